//! Command implementations.

pub mod cache;
pub mod completions;
pub mod settings;
pub mod status;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{load_config, resolve_db_path, resolve_shared_root, Config};
use crate::error::{Error, Result};
use crate::storage::LocalStore;
use crate::sync::{
    spawn, CredentialGate, DirectorySource, EnvCredentialStore, FsSharedStore, ReplicaStore,
    SyncEngine, SyncService,
};

/// Resolved configuration and paths for one invocation.
#[derive(Debug)]
pub struct Workspace {
    pub config: Config,
    pub shared_root: Option<PathBuf>,
    pub db_path: PathBuf,
}

impl Workspace {
    /// Load the config file and resolve paths against CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is malformed or no database path
    /// can be determined.
    pub fn load(shared_root: Option<&PathBuf>, db: Option<&PathBuf>) -> Result<Self> {
        let config = load_config()?;
        let shared_root = resolve_shared_root(shared_root.map(PathBuf::as_path), &config);
        let db_path = resolve_db_path(db.map(PathBuf::as_path), &config).ok_or_else(|| {
            Error::Config("Could not determine home directory; pass --db".to_string())
        })?;
        Ok(Self {
            config,
            shared_root,
            db_path,
        })
    }

    /// Docket source directory: explicit flag, else config.
    #[must_use]
    pub fn source_dir(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.config.source_dir.clone())
    }

    /// Open the local store, build the engine and start the sync service.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the local database cannot be opened.
    pub fn start(&self, source_dir: Option<PathBuf>) -> Result<(SyncService, JoinHandle<()>)> {
        if self.shared_root.is_none() {
            info!("No shared root configured, running local-only");
        }

        let store = self.shared_root.clone().map(FsSharedStore::new);
        let replicas =
            ReplicaStore::with_layout(store, &self.config.cache_file, &self.config.settings_dir);
        let local = LocalStore::open(&self.db_path)?;
        let source = DirectorySource::new(source_dir.unwrap_or_default());
        let credentials = Arc::new(CredentialGate::new(EnvCredentialStore));

        let engine =
            SyncEngine::new(replicas, local, source, credentials).with_policy(self.config.policy);
        Ok(spawn(engine))
    }
}

/// Create a runtime for async command bodies.
pub(crate) fn runtime() -> Result<Runtime> {
    Runtime::new().map_err(|e| Error::Other(format!("Failed to create tokio runtime: {e}")))
}
