//! Local-directory object store, used for development and `file://` remotes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use super::{ObjectState, ObjectStore, RemoteError};

/// Append-only files under a root directory.
///
/// A regular file is an append-only object; a directory at the same path is
/// reported as a different kind.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn inspect(&self, path: &str) -> Result<ObjectState, RemoteError> {
        match tokio::fs::metadata(self.object_path(path)).await {
            Ok(meta) if meta.is_file() => Ok(ObjectState::AppendOnly),
            Ok(meta) if meta.is_dir() => Ok(ObjectState::Other("directory".to_string())),
            Ok(_) => Ok(ObjectState::Other("special file".to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ObjectState::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_append_only(&self, path: &str) -> Result<(), RemoteError> {
        let target = self.object_path(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await?;
        Ok(())
    }

    async fn append_block(&self, path: &str, data: Vec<u8>) -> Result<(), RemoteError> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.object_path(path))
            .await?;
        file.write_all(&data).await?;
        file.sync_data().await?;
        Ok(())
    }
}
