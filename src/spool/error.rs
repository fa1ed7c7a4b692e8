//! Spool-specific error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while writing or listing spooled parts.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// Filesystem operation failed.
    #[error("spool io error at '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Record could not be serialized.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Logical target path escapes the spool root or is empty.
    #[error("invalid spool target '{0}'")]
    InvalidTarget(String),

    /// The blocking write task did not complete.
    #[error("spool write task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    /// Directory walk failed.
    #[error("failed to scan spool: {0}")]
    Walk(#[from] walkdir::Error),
}

impl SpoolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
