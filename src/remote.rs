//! Remote append-only object store.
//!
//! The flush engine only needs three operations: inspect what lives at a path,
//! create an empty append-only object, and append one block to it.
//!
//! - [`AzureBlobStore`]: Azure Append Blobs over the Blob REST API
//! - [`LocalStore`]: append-only files under a local directory (`file://`)

mod azure;
mod local;

use std::sync::Arc;

use thiserror::Error;

pub use azure::{AzureBlobStore, ConnectionString, Credentials};
pub use local::LocalStore;

use crate::config::RemoteConfig;

/// Errors raised by remote store clients.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection string or credentials are unusable.
    #[error("remote config error: {0}")]
    Config(String),

    /// Transport-level failure.
    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an unexpected status.
    #[error("remote returned HTTP {status} during {operation}: {body}")]
    Status {
        /// Operation being performed (`inspect`, `create`, `append`, ...).
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// An object exists at the path but is not append-only.
    #[error("object '{path}' exists as {found}, not as an append-only object")]
    KindMismatch {
        /// Remote path.
        path: String,
        /// Kind reported by the store.
        found: String,
    },

    /// Local filesystem failure (local store).
    #[error("remote io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What currently lives at a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectState {
    /// Nothing yet.
    Missing,
    /// An append-only object.
    AppendOnly,
    /// Some other kind of object, named by the store.
    Other(String),
}

/// Append-only object store capability.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Inspect the object at `path`.
    async fn inspect(&self, path: &str) -> Result<ObjectState, RemoteError>;

    /// Create an empty append-only object at `path`.
    async fn create_append_only(&self, path: &str) -> Result<(), RemoteError>;

    /// Append `data` as one block to the object at `path`.
    async fn append_block(&self, path: &str, data: Vec<u8>) -> Result<(), RemoteError>;
}

/// Make sure `path` holds an append-only object, creating it when missing.
///
/// # Errors
/// [`RemoteError::KindMismatch`] when a different kind of object is there.
pub async fn ensure_append_only(store: &dyn ObjectStore, path: &str) -> Result<(), RemoteError> {
    match store.inspect(path).await? {
        ObjectState::AppendOnly => Ok(()),
        ObjectState::Missing => {
            tracing::debug!(object = %path, "Creating append-only object");
            store.create_append_only(path).await
        }
        ObjectState::Other(found) => Err(RemoteError::KindMismatch {
            path: path.to_string(),
            found,
        }),
    }
}

/// Build a store client from configuration.
///
/// Returns `Ok(None)` when no connection string is configured, so callers can
/// treat upload as unavailable rather than failed.
///
/// # Errors
/// Returns [`RemoteError`] if the connection string is malformed or the
/// client cannot be constructed.
pub fn connect(config: &RemoteConfig) -> Result<Option<Arc<dyn ObjectStore>>, RemoteError> {
    let Some(conn) = config
        .connection_string
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    else {
        return Ok(None);
    };

    if let Some(path) = conn.strip_prefix("file://") {
        let store = LocalStore::new(std::path::Path::new(path).join(&config.container));
        return Ok(Some(Arc::new(store)));
    }

    let parsed = ConnectionString::parse(conn)?;
    let store = AzureBlobStore::new(parsed, &config.container, config.timeout)?;
    Ok(Some(Arc::new(store)))
}

/// Truncate a response body for error messages.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
