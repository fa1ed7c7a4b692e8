//! Core runner trait and types.

use std::fmt;

use thiserror::Error;

use crate::config::{ConfigError, JobDefinition};
use crate::fetch::FetchError;
use crate::flush::FlushReport;
use crate::interpolate::ResolutionError;
use crate::spool::SpoolError;

/// Errors that abort one job run.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Job definition is unusable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An endpoint could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Fetch of a single-mode endpoint or of the loop list failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Writing to the spool failed.
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),
}

/// Outcome of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Records written to the spool.
    pub collected: usize,
    /// Loop-mode items whose resolution or fetch failed.
    pub item_failures: usize,
    /// Loop-mode items skipped for a missing or falsy id.
    pub skipped: usize,
    /// Flush of this run's target.
    pub flush: FlushReport,
}

impl fmt::Display for CollectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collected {}, flushed {}, failed {}",
            self.collected, self.flush.flushed, self.flush.failed
        )?;
        if self.item_failures > 0 {
            write!(f, ", item failures {}", self.item_failures)?;
        }
        Ok(())
    }
}

/// Executes one run of a job.
///
/// The scheduler dispatches through this trait; errors are logged at the
/// dispatch boundary and never stop the tick loop.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Run `job` once.
    async fn run(&self, job: JobDefinition) -> Result<CollectionReport, CollectorError>;
}
