//! Local Spool
//!
//! Write-ahead staging area between collection and upload. Every fetched
//! record becomes one part file under the spool directory of its logical
//! remote target:
//!
//! ```text
//! <root>/bronze/proxmox/node_status/dt=2024-03-09/node_status_hl2_2024-03-09.jsonl.parts/
//!     20240309T070501_0000000042_5f0c...e1.jsonl.part
//! ```
//!
//! Part files are written once (temp file + rename) and never appended to.
//! They stay on disk until the flush engine has appended them remotely, so
//! a crash at any point loses nothing. Concurrent writers need no locks:
//! jobs target distinct directories and file names carry a random suffix.

mod error;
pub mod layout;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use walkdir::WalkDir;

pub use error::SpoolError;
pub use layout::{BronzePath, PART_FILE_SUFFIX, PARTS_DIR_SUFFIX, expand_path_template};

use crate::record::SpoolRecord;
use layout::{PART_TMP_SUFFIX, part_file_name};

/// Attempts at picking a fresh part name before giving up.
const MAX_NAME_ATTEMPTS: usize = 3;

/// Handle to a part file that has been durably written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHandle {
    /// Logical target the part belongs to.
    pub target: String,
    /// Absolute path of the part file.
    pub path: PathBuf,
}

/// Spool rooted at a configurable directory, created lazily on first write.
#[derive(Debug, Clone)]
pub struct Spool {
    root: PathBuf,
}

impl Spool {
    /// Create a spool handle. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Spool root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Spool directory of a logical target: `<root>/<target>.parts`.
    pub fn parts_dir(&self, target: &str) -> PathBuf {
        self.root.join(format!("{target}{PARTS_DIR_SUFFIX}"))
    }

    /// Durably write one record for `target`.
    ///
    /// # Errors
    /// Returns [`SpoolError::InvalidTarget`] for empty or escaping targets,
    /// otherwise I/O or serialization errors.
    pub fn write(&self, target: &str, record: &SpoolRecord) -> Result<PartHandle, SpoolError> {
        let line = record.to_line()?;
        self.write_line(target, &line)
    }

    /// [`Spool::write`] on the blocking thread pool, for async callers.
    ///
    /// # Errors
    /// Same as [`Spool::write`], plus [`SpoolError::Blocking`] if the
    /// blocking task panicked.
    pub async fn write_async(
        &self,
        target: &str,
        record: &SpoolRecord,
    ) -> Result<PartHandle, SpoolError> {
        let line = record.to_line()?;
        let spool = self.clone();
        let target = target.to_string();
        tokio::task::spawn_blocking(move || spool.write_line(&target, &line)).await?
    }

    /// Write one pre-serialized line as a new part file.
    pub fn write_line(&self, target: &str, line: &str) -> Result<PartHandle, SpoolError> {
        validate_target(target)?;

        let dir = self.parts_dir(target);
        fs::create_dir_all(&dir).map_err(|e| SpoolError::io(&dir, e))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let path = dir.join(part_file_name(Utc::now()));
            match write_new_file(&path, line.as_bytes()) {
                Ok(()) => {
                    tracing::trace!(target = %target, part = %path.display(), "Spooled record");
                    return Ok(PartHandle {
                        target: target.to_string(),
                        path,
                    });
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt < MAX_NAME_ATTEMPTS =>
                {
                    continue;
                }
                Err(e) => return Err(SpoolError::io(path, e)),
            }
        }
    }

    /// Part files of `target`, sorted by name (chronological).
    ///
    /// A missing spool directory yields an empty list.
    pub fn list_parts(&self, target: &str) -> Result<Vec<PathBuf>, SpoolError> {
        list_parts_in(&self.parts_dir(target))
    }

    /// Logical targets that currently have a spool directory, sorted.
    pub fn targets(&self) -> Result<Vec<String>, SpoolError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut targets = Vec::new();
        let mut walker = WalkDir::new(&self.root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                // Removed by a concurrent flush.
                Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !name.ends_with(PARTS_DIR_SUFFIX) {
                continue;
            }
            walker.skip_current_dir();

            if let Some(target) = self.target_of(entry.path()) {
                targets.push(target);
            }
        }

        targets.sort();
        Ok(targets)
    }

    /// Number of part files waiting across all targets.
    pub fn pending(&self) -> Result<usize, SpoolError> {
        self.targets()?
            .iter()
            .map(|t| self.list_parts(t).map(|p| p.len()))
            .sum()
    }

    /// Remove temp files of interrupted writes to `target` that are older
    /// than `older_than`. Returns how many were removed.
    pub fn sweep_stale_tmp(&self, target: &str, older_than: Duration) -> usize {
        let Ok(entries) = fs::read_dir(self.parts_dir(target)) else {
            return 0;
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(PART_TMP_SUFFIX));
            if !is_tmp {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .is_ok_and(|modified| now.duration_since(modified).unwrap_or_default() >= older_than);
            if stale && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Best-effort removal of an empty spool directory. Races are ignored.
    pub fn remove_dir_if_empty(&self, target: &str) -> bool {
        fs::remove_dir(self.parts_dir(target)).is_ok()
    }

    /// Logical target of a spool directory under the root.
    fn target_of(&self, dir: &Path) -> Option<String> {
        let rel = dir.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        let joined = parts.join("/");
        joined
            .strip_suffix(PARTS_DIR_SUFFIX)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

fn validate_target(target: &str) -> Result<(), SpoolError> {
    let path = Path::new(target);
    let valid = !target.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if valid {
        Ok(())
    } else {
        Err(SpoolError::InvalidTarget(target.to_string()))
    }
}

/// Write `data` to a fresh temp file, sync it, then move it into place.
fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if path.exists() {
        return Err(std::io::ErrorKind::AlreadyExists.into());
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(PART_TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(data)?;
        file.sync_data()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Finished part files in `dir`, sorted by name.
pub(crate) fn list_parts_in(dir: &Path) -> Result<Vec<PathBuf>, SpoolError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SpoolError::io(dir, e)),
    };

    let mut parts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SpoolError::io(dir, e))?;
        let path = entry.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PART_FILE_SUFFIX));
        if is_part && path.is_file() {
            parts.push(path);
        }
    }

    parts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(parts)
}
