//! Flush Engine
//!
//! Moves spooled part files to their remote append-only objects and removes
//! them locally once appended.
//!
//! # Delivery
//!
//! Each part is appended as one block and then deleted. If the delete fails
//! after a successful append the part is still counted as flushed, and a
//! later pass may append it again: delivery is at-least-once.
//!
//! # Failure isolation
//!
//! - Remote unavailable (no connection string): no-op, `(0, 0)`.
//! - Client construction failure: one failure for the whole invocation.
//! - Kind mismatch or inspect/create failure: one failure for that target,
//!   other targets continue.
//! - Append failure: the part and every later part of that target stay on
//!   disk for the next pass, so remote order always matches spool order.

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::remote::{self, ObjectStore, RemoteError, ensure_append_only};
use crate::spool::Spool;

/// Temp files from interrupted part writes older than this are removed.
pub const STALE_TMP_AGE: Duration = Duration::from_secs(3600);

/// Outcome counters of a flush invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Parts appended remotely.
    pub flushed: usize,
    /// Failures (failed appends, unreadable parts, failed targets, or a
    /// failed client construction).
    pub failed: usize,
}

impl FlushReport {
    /// Report of a single failure.
    pub fn failure() -> Self {
        Self {
            flushed: 0,
            failed: 1,
        }
    }

    fn absorb(&mut self, other: FlushReport) {
        self.flushed += other.flushed;
        self.failed += other.failed;
    }
}

impl fmt::Display for FlushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flushed {}, failed {}", self.flushed, self.failed)
    }
}

/// Uploads spool directories to an [`ObjectStore`].
pub struct FlushEngine {
    spool: Spool,
    store: Option<Arc<dyn ObjectStore>>,
}

impl fmt::Debug for FlushEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushEngine")
            .field("spool", &self.spool.root())
            .field("store", &self.store.as_ref().map(|s| s.describe()))
            .finish()
    }
}

impl FlushEngine {
    /// Engine uploading to `store`.
    pub fn new(spool: Spool, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            spool,
            store: Some(store),
        }
    }

    /// Engine without a remote; every flush is a no-op.
    pub fn disabled(spool: Spool) -> Self {
        Self { spool, store: None }
    }

    /// Build an engine from remote configuration.
    ///
    /// # Errors
    /// Returns [`RemoteError`] if a connection string is configured but the
    /// client cannot be built. A missing connection string is not an error.
    pub fn from_config(spool: Spool, remote: &RemoteConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            store: remote::connect(remote)?,
            spool,
        })
    }

    /// True if a remote store is configured.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Flush one logical target, or every spooled target when `None`.
    ///
    /// Never fails; per-target and per-part failures are counted.
    pub async fn flush(&self, target: Option<&str>) -> FlushReport {
        let Some(store) = self.store.as_deref() else {
            tracing::debug!("No remote store configured, skipping flush");
            return FlushReport::default();
        };

        let targets = match target {
            Some(target) => vec![target.to_string()],
            None => match self.spool.targets() {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::error!(error = %e, spool = %self.spool.root().display(), "Failed to scan spool");
                    return FlushReport::failure();
                }
            },
        };

        let mut report = FlushReport::default();
        for target in &targets {
            report.absorb(self.flush_target(store, target).await);
        }
        report
    }

    async fn flush_target(&self, store: &dyn ObjectStore, target: &str) -> FlushReport {
        let mut report = FlushReport::default();

        let swept = self.spool.sweep_stale_tmp(target, STALE_TMP_AGE);
        if swept > 0 {
            tracing::warn!(target = %target, swept, "Removed interrupted part writes");
        }

        let parts = match self.spool.list_parts(target) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(target = %target, error = %e, "Failed to list spooled parts");
                return FlushReport::failure();
            }
        };
        if parts.is_empty() {
            self.spool.remove_dir_if_empty(target);
            return report;
        }

        if let Err(e) = ensure_append_only(store, target).await {
            tracing::error!(target = %target, error = %e, "Cannot prepare remote object");
            return FlushReport::failure();
        }

        let total = parts.len();
        for (idx, part) in parts.iter().enumerate() {
            let data = match tokio::fs::read(part).await {
                Ok(data) => data,
                // Taken by a concurrent flush of the same target.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(part = %part.display(), error = %e, "Failed to read spooled part");
                    report.failed += 1;
                    continue;
                }
            };

            // Parts after a failed append wait for the next pass so the remote
            // object keeps spool order. A part the store rejects every time
            // holds its whole target back until it is removed by hand.
            if let Err(e) = store.append_block(target, data).await {
                tracing::error!(
                    target = %target,
                    part = %part.display(),
                    deferred = total - idx,
                    error = %e,
                    "Append failed, leaving remaining parts for the next flush"
                );
                report.failed += 1;
                break;
            }

            if let Err(e) = tokio::fs::remove_file(part).await {
                tracing::warn!(
                    part = %part.display(),
                    error = %e,
                    "Appended part could not be removed and may be appended again"
                );
            }
            report.flushed += 1;
        }

        self.spool.remove_dir_if_empty(target);
        tracing::info!(target = %target, flushed = report.flushed, failed = report.failed, "Flushed spool target");
        report
    }
}

/// Connect using `remote` and flush, folding a construction failure into
/// the report.
pub async fn flush_spool(spool: &Spool, remote: &RemoteConfig, target: Option<&str>) -> FlushReport {
    match FlushEngine::from_config(spool.clone(), remote) {
        Ok(engine) => engine.flush(target).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise remote store");
            FlushReport::failure()
        }
    }
}
