//! Shared key-value store over a mounted directory.
//!
//! The shared volume is modelled as an external key-value store keyed by
//! slash-separated relative paths. The contract is deliberately weak:
//!
//! - `put` is a best-effort overwrite. No lock is taken; two writers on
//!   different machines can race and the later write silently wins.
//! - `get` returns the stored bytes together with the modification time of
//!   the underlying file, which is the only ordering signal available.
//! - A stalled or missing mount is indistinguishable from an empty store
//!   from the caller's point of view; both surface as unreachable.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::sync::file::{atomic_write, ensure_directory, modified_at};
use crate::sync::types::{SyncError, SyncResult};

/// Bytes read from the store plus the time they were last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub bytes: Vec<u8>,
    pub modified_at: DateTime<Utc>,
}

/// Key-value access to the shared volume.
pub trait SharedStore: Send {
    /// Whether the store root is currently reachable.
    fn is_reachable(&self) -> bool;

    /// Read a key. `Ok(None)` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the read fails.
    fn get(&self, key: &str) -> SyncResult<Option<StoredValue>>;

    /// Overwrite a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the write fails.
    fn put(&self, key: &str, bytes: &[u8]) -> SyncResult<()>;

    /// List key names (without extension) directly under a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or listing fails.
    fn list(&self, namespace: &str) -> SyncResult<Vec<String>>;

    /// Remove a key. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or removal fails.
    fn delete(&self, key: &str) -> SyncResult<bool>;
}

/// [`SharedStore`] backed by a directory on a mounted volume.
#[derive(Debug, Clone)]
pub struct FsSharedStore {
    root: PathBuf,
}

impl FsSharedStore {
    /// Create a store rooted at the given mount point.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The mount root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    fn require_reachable(&self) -> SyncResult<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(SyncError::StorageUnavailable(self.root.display().to_string()))
        }
    }
}

impl SharedStore for FsSharedStore {
    fn is_reachable(&self) -> bool {
        self.root.is_dir()
    }

    fn get(&self, key: &str) -> SyncResult<Option<StoredValue>> {
        self.require_reachable()?;
        let path = self.path_for(key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified_at = modified_at(&path)?;

        debug!(key, len = bytes.len(), "Read shared key");
        Ok(Some(StoredValue { bytes, modified_at }))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> SyncResult<()> {
        self.require_reachable()?;
        let path = self.path_for(key);

        // Walk each intermediate directory so a squatting file at any level
        // is moved aside rather than failing the write.
        if let Some(parent) = path.parent() {
            let mut dir = self.root.clone();
            if let Ok(relative) = parent.strip_prefix(&self.root) {
                for part in relative.components() {
                    dir.push(part);
                    ensure_directory(&dir)?;
                }
            }
        }

        atomic_write(&path, bytes)?;
        debug!(key, len = bytes.len(), "Wrote shared key");
        Ok(())
    }

    fn list(&self, namespace: &str) -> SyncResult<Vec<String>> {
        self.require_reachable()?;
        let dir = self.path_for(namespace);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn delete(&self, key: &str) -> SyncResult<bool> {
        self.require_reachable()?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// No shared volume configured: always unreachable.
impl<S: SharedStore> SharedStore for Option<S> {
    fn is_reachable(&self) -> bool {
        self.as_ref().is_some_and(SharedStore::is_reachable)
    }

    fn get(&self, key: &str) -> SyncResult<Option<StoredValue>> {
        self.as_ref().ok_or_else(unconfigured)?.get(key)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> SyncResult<()> {
        self.as_ref().ok_or_else(unconfigured)?.put(key, bytes)
    }

    fn list(&self, namespace: &str) -> SyncResult<Vec<String>> {
        self.as_ref().ok_or_else(unconfigured)?.list(namespace)
    }

    fn delete(&self, key: &str) -> SyncResult<bool> {
        self.as_ref().ok_or_else(unconfigured)?.delete(key)
    }
}

fn unconfigured() -> SyncError {
    SyncError::StorageUnavailable("no shared root configured".to_string())
}
