//! Cache and settings replicas on the shared volume.
//!
//! All shared-volume I/O goes through [`ReplicaStore`]. Unreachable storage
//! is reported as "nothing there" rather than as an error, so callers fall
//! back to local-only operation without special casing.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{is_valid_owner_id, SettingsReplica};
use crate::sync::file::to_stable_json;
use crate::sync::store::SharedStore;
use crate::sync::types::{CacheRecord, SyncError, SyncResult};

/// Default cache file name at the shared root.
pub const DEFAULT_CACHE_FILE: &str = "docket_cache.json";

/// Default subdirectory holding per-user settings.
pub const DEFAULT_SETTINGS_DIR: &str = "user_settings";

/// Reads and writes replicas through a [`SharedStore`].
#[derive(Debug)]
pub struct ReplicaStore<S> {
    store: S,
    cache_key: String,
    settings_dir: String,
}

impl<S: SharedStore> ReplicaStore<S> {
    /// Create a replica store using the default layout.
    pub fn new(store: S) -> Self {
        Self::with_layout(store, DEFAULT_CACHE_FILE, DEFAULT_SETTINGS_DIR)
    }

    /// Create a replica store with a custom cache file and settings directory.
    pub fn with_layout(store: S, cache_file: &str, settings_dir: &str) -> Self {
        Self {
            store,
            cache_key: cache_file.to_string(),
            settings_dir: settings_dir.trim_matches('/').to_string(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether the shared volume is reachable.
    pub fn is_reachable(&self) -> bool {
        self.store.is_reachable()
    }

    fn settings_key(&self, owner_id: &str) -> SyncResult<String> {
        if !is_valid_owner_id(owner_id) {
            return Err(SyncError::InvalidOwnerId(owner_id.to_string()));
        }
        Ok(format!("{}/{owner_id}.json", self.settings_dir))
    }

    /// Load the cache record.
    ///
    /// Returns `Ok(None)` if the volume is unreachable or the file is absent.
    /// Records without integrity metadata decode normally.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Decode`] if the file exists but is not a valid
    /// cache record, or an IO error if the read itself fails.
    pub fn load_cache(&self) -> SyncResult<Option<CacheRecord>> {
        if !self.store.is_reachable() {
            debug!("Shared volume unreachable, no cache");
            return Ok(None);
        }

        let Some(value) = self.store.get(&self.cache_key)? else {
            return Ok(None);
        };

        serde_json::from_slice(&value.bytes)
            .map(Some)
            .map_err(|e| SyncError::Decode(format!("{}: {e}", self.cache_key)))
    }

    /// Overwrite the cache record.
    ///
    /// Best effort: no lock is held, so a concurrent writer on another
    /// machine may overwrite this record immediately afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume is unreachable or the write fails.
    pub fn save_cache(&self, record: &CacheRecord) -> SyncResult<()> {
        let bytes = to_stable_json(record)?;
        self.store.put(&self.cache_key, &bytes)
    }

    /// Load a user's shared settings with the file's modification time.
    ///
    /// Unreachable storage, a missing file and a malformed file all yield
    /// `Ok(None)`; the caller falls back to local settings.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID or a failed read.
    pub fn load_settings(&self, owner_id: &str) -> SyncResult<Option<SettingsReplica>> {
        let key = self.settings_key(owner_id)?;
        if !self.store.is_reachable() {
            return Ok(None);
        }

        let Some(value) = self.store.get(&key)? else {
            return Ok(None);
        };

        match serde_json::from_slice::<Value>(&value.bytes) {
            Ok(blob) => Ok(Some(SettingsReplica {
                owner_id: owner_id.to_string(),
                blob,
                store_modified_at: value.modified_at,
            })),
            Err(e) => {
                warn!(owner = owner_id, error = %e, "Shared settings undecodable, ignoring");
                Ok(None)
            }
        }
    }

    /// Write a user's settings to the shared volume.
    ///
    /// Ensures the settings directory exists first (moving aside any file in
    /// its way). Returns the modification time of the written file.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume is unreachable or the write fails.
    pub fn save_settings(&self, owner_id: &str, blob: &Value) -> SyncResult<DateTime<Utc>> {
        let key = self.settings_key(owner_id)?;
        let bytes = to_stable_json(blob)?;
        self.store.put(&key, &bytes)?;

        // Re-read to capture the mtime as the filesystem recorded it.
        match self.store.get(&key)? {
            Some(value) => Ok(value.modified_at),
            None => Err(SyncError::Propagation(format!(
                "{key} vanished after write"
            ))),
        }
    }

    /// Remove a user's shared settings. Absence is not an error.
    ///
    /// Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume is unreachable or removal fails.
    pub fn delete_settings(&self, owner_id: &str) -> SyncResult<bool> {
        let key = self.settings_key(owner_id)?;
        self.store.delete(&key)
    }

    /// List owner IDs that have shared settings.
    ///
    /// Returns an empty list if the volume is unreachable.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails on a reachable volume.
    pub fn list_owner_ids(&self) -> SyncResult<Vec<String>> {
        if !self.store.is_reachable() {
            return Ok(Vec::new());
        }
        let mut ids = self.store.list(&self.settings_dir)?;
        ids.retain(|id| is_valid_owner_id(id));
        Ok(ids)
    }
}
