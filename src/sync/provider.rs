//! Docket source and credential collaborators.
//!
//! The replication layer does not talk to project-management APIs itself.
//! It asks a [`DocketSource`] for containers and dockets and wraps whatever
//! comes back. Credentials are fetched through a [`CredentialGate`], which
//! keeps at most one credential refresh in flight.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::DocketRecord;
use crate::sync::types::{SyncError, SyncResult};

/// Upstream producer of docket records.
///
/// Implemented by API clients. The trait uses `impl Future` returns, so it is
/// used through generics rather than trait objects.
pub trait DocketSource: Send + Sync {
    /// Credential service key this source needs, if any.
    fn credential_key(&self) -> Option<&str> {
        None
    }

    /// Enumerate every upstream container that may hold dockets.
    fn list_upstream_containers(
        &self,
        token: Option<&str>,
    ) -> impl Future<Output = SyncResult<Vec<String>>> + Send;

    /// Fetch all dockets from the given containers, one batch per
    /// container that could be read.
    fn fetch_dockets(
        &self,
        container_ids: &[String],
        token: Option<&str>,
    ) -> impl Future<Output = SyncResult<Vec<ContainerBatch>>> + Send;
}

/// Dockets fetched from one upstream container.
///
/// Attribution comes from the fetch, not from the dockets' own `sourceId`,
/// which upstream data may set to anything.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerBatch {
    pub container_id: String,
    pub dockets: Vec<DocketRecord>,
}

impl ContainerBatch {
    pub fn new(container_id: &str, dockets: Vec<DocketRecord>) -> Self {
        Self {
            container_id: container_id.to_string(),
            dockets,
        }
    }
}

/// Source that reads containers from a local directory.
///
/// Each `<container>.json` file holds a JSON array of dockets. Dockets
/// without a `sourceId` are stamped with their container name.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DocketSource for DirectorySource {
    async fn list_upstream_containers(&self, _token: Option<&str>) -> SyncResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SyncError::Source(format!("{}: {e}", self.dir.display())))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        ids.sort();
        debug!(count = ids.len(), dir = %self.dir.display(), "Discovered containers");
        Ok(ids)
    }

    async fn fetch_dockets(
        &self,
        container_ids: &[String],
        _token: Option<&str>,
    ) -> SyncResult<Vec<ContainerBatch>> {
        let mut batches = Vec::with_capacity(container_ids.len());

        for id in container_ids {
            let path = self.dir.join(format!("{id}.json"));
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(container = %id, "Container vanished, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut dockets: Vec<DocketRecord> = serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::Source(format!("{}: {e}", path.display())))?;
            for docket in &mut dockets {
                if docket.source_id.is_none() {
                    docket.source_id = Some(id.clone());
                }
            }
            batches.push(ContainerBatch::new(id, dockets));
        }

        Ok(batches)
    }
}

/// Token lookup for upstream services.
pub trait CredentialStore: Send + Sync {
    /// Current secret for a service key, if any.
    fn get(&self, service_key: &str) -> Option<String>;

    /// Obtain a fresh secret for a service key.
    fn refresh(&self, service_key: &str) -> impl Future<Output = SyncResult<Option<String>>> + Send;
}

/// Credentials from `DOCKETSYNC_TOKEN_<KEY>` environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    /// Environment variable consulted for a service key.
    #[must_use]
    pub fn var_name(service_key: &str) -> String {
        let suffix: String = service_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("DOCKETSYNC_TOKEN_{suffix}")
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get(&self, service_key: &str) -> Option<String> {
        std::env::var(Self::var_name(service_key))
            .ok()
            .filter(|v| !v.is_empty())
    }

    async fn refresh(&self, service_key: &str) -> SyncResult<Option<String>> {
        Ok(self.get(service_key))
    }
}

/// Clears the in-flight flag when a refresh finishes or is abandoned.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Credential access with a single in-flight refresh.
///
/// A caller that finds a refresh already running waits briefly and re-reads
/// the store instead of starting a second refresh. There is no queue.
#[derive(Debug)]
pub struct CredentialGate<C> {
    store: C,
    refreshing: AtomicBool,
    poll_interval: Duration,
    max_polls: u32,
}

impl<C: CredentialStore> CredentialGate<C> {
    pub fn new(store: C) -> Self {
        Self::with_wait(store, Duration::from_millis(100), 20)
    }

    /// Configure how long a waiting caller polls for a running refresh.
    pub fn with_wait(store: C, poll_interval: Duration, max_polls: u32) -> Self {
        Self {
            store,
            refreshing: AtomicBool::new(false),
            poll_interval,
            max_polls,
        }
    }

    /// Get a token, refreshing it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingCredential`] if no token is available
    /// after a refresh (or after waiting for someone else's refresh), or the
    /// refresh's own error.
    pub async fn token(&self, service_key: &str) -> SyncResult<String> {
        if let Some(token) = self.store.get(service_key) {
            return Ok(token);
        }

        let missing = || SyncError::MissingCredential(service_key.to_string());

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(service_key, "Credential refresh in flight, waiting");
            for _ in 0..self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
                if !self.refreshing.load(Ordering::Acquire) {
                    break;
                }
            }
            return self.store.get(service_key).ok_or_else(missing);
        }

        let _in_flight = InFlight(&self.refreshing);
        debug!(service_key, "Refreshing credential");
        self.store.refresh(service_key).await?.ok_or_else(missing)
    }
}
