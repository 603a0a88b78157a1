//! The sync engine: cache refresh and settings replication.
//!
//! [`SyncEngine`] ties the shared replicas, the device-local store, the
//! docket source and the credential gate together. It is owned by a single
//! task (see [`crate::sync::service`]) and never shared, so every method
//! takes `&mut self` and nothing here needs a lock.
//!
//! No method in this module fails because the shared volume is away. An
//! unreachable volume degrades cache reads to "no cache" and settings to
//! `LocalOnly`. Errors are returned only for bad input and for a failing
//! local database.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::model::{is_valid_owner_id, DocketRecord, LocalSettings, SettingsReplica};
use crate::storage::{Event, EventType, LocalStore, CACHE_SUBJECT};
use crate::sync::coordinator::{
    appears_incomplete, effective_peak, needs_discovery, needs_full_sync, next_metadata,
    plan_refresh, SyncPolicy,
};
use crate::sync::integrity::{assess, compute_metadata, scan_field_issues};
use crate::sync::provider::{ContainerBatch, CredentialGate, CredentialStore, DocketSource};
use crate::sync::replica::ReplicaStore;
use crate::sync::resolver::{ConflictResolver, SessionSync};
use crate::sync::store::SharedStore;
use crate::sync::types::{
    CacheRecord, FieldIssue, IntegrityMetadata, IntegrityStatus, RefreshOutcome, RefreshPlan,
    Resolution, SyncError, SyncEvent, SyncResult, SyncStatus,
};

/// Diagnostic view of the shared cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub reachable: bool,
    pub present: bool,
    /// `None` if there is no record to classify.
    pub status: Option<IntegrityStatus>,
    pub docket_count: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub integrity: Option<IntegrityMetadata>,
    pub field_issues: Vec<FieldIssue>,
    pub needs_full_sync: bool,
    pub needs_discovery: bool,
}

/// Outcome of a settings operation for one owner.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsSyncReport {
    pub owner_id: String,
    pub status: SyncStatus,
    /// Set when the operation compared local and shared copies.
    pub resolution: Option<Resolution>,
    /// The settings value the device holds afterwards.
    pub blob: Value,
    pub events: Vec<SyncEvent>,
}

fn local_err(err: crate::error::Error) -> SyncError {
    SyncError::Database(err.to_string())
}

fn check_owner(owner_id: &str) -> SyncResult<()> {
    if is_valid_owner_id(owner_id) {
        Ok(())
    } else {
        Err(SyncError::InvalidOwnerId(owner_id.to_string()))
    }
}

/// Metadata to plan against, synthesizing history for legacy records.
fn history_of(record: &CacheRecord) -> IntegrityMetadata {
    record
        .integrity
        .clone()
        .unwrap_or_else(|| compute_metadata(&record.dockets, record.last_sync))
}

/// Key-sorted docket set with later entries replacing earlier ones.
fn dedupe(base: Vec<DocketRecord>, updates: Vec<DocketRecord>) -> Vec<DocketRecord> {
    let mut by_key: BTreeMap<String, DocketRecord> = BTreeMap::new();
    for docket in base.into_iter().chain(updates) {
        by_key.insert(docket.full_name.clone(), docket);
    }
    by_key.into_values().collect()
}

/// Fetch dockets and note which containers yielded any.
async fn fetch_from<P: DocketSource>(
    source: &P,
    containers: &[String],
    token: Option<&str>,
) -> SyncResult<(Vec<DocketRecord>, BTreeSet<String>)> {
    let batches: Vec<ContainerBatch> = source.fetch_dockets(containers, token).await?;
    let mut dockets = Vec::new();
    let mut bearing = BTreeSet::new();
    for batch in batches {
        if !batch.dockets.is_empty() {
            bearing.insert(batch.container_id);
        }
        dockets.extend(batch.dockets);
    }
    Ok((dockets, bearing))
}

/// Owns the replicas and drives every sync operation.
pub struct SyncEngine<S, P, C> {
    replicas: ReplicaStore<S>,
    local: LocalStore,
    source: P,
    credentials: Arc<CredentialGate<C>>,
    policy: SyncPolicy,
    resolver: ConflictResolver,
    sessions: HashMap<String, SessionSync>,
}

impl<S, P, C> SyncEngine<S, P, C>
where
    S: SharedStore,
    P: DocketSource,
    C: CredentialStore,
{
    pub fn new(
        replicas: ReplicaStore<S>,
        local: LocalStore,
        source: P,
        credentials: Arc<CredentialGate<C>>,
    ) -> Self {
        Self {
            replicas,
            local,
            source,
            credentials,
            policy: SyncPolicy::default(),
            resolver: ConflictResolver::default(),
            sessions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn replicas(&self) -> &ReplicaStore<S> {
        &self.replicas
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn record(&self, event: &Event) {
        if let Err(e) = self.local.record_event(event) {
            warn!(error = %e, "Failed to record sync event");
        }
    }

    // ── Cache ─────────────────────────────────────────────────

    /// Load the shared cache if it is present and passes integrity checks.
    ///
    /// A record that fails classification (or the structural scan) is
    /// discarded with a logged reason, which forces discovery on the next
    /// refresh.
    pub fn load_cache(&mut self) -> Option<CacheRecord> {
        let record = match self.replicas.load_cache() {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(SyncError::Decode(reason)) => {
                self.discard(&IntegrityStatus::Corrupted { reason });
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed");
                return None;
            }
        };

        let status = assess(&record, Utc::now());
        if status.is_valid() {
            debug!(count = record.dockets.len(), %status, "Loaded cache");
            Some(record)
        } else {
            self.discard(&status);
            None
        }
    }

    fn discard(&self, status: &IntegrityStatus) {
        warn!(%status, "Discarding shared cache");
        self.record(
            &Event::new(CACHE_SUBJECT, EventType::CacheDiscarded).with_detail(&status.to_string()),
        );
    }

    /// Classify the shared cache without discarding anything.
    pub fn inspect_cache(&self) -> CacheReport {
        let now = Utc::now();
        let reachable = self.replicas.is_reachable();
        let mut report = CacheReport {
            reachable,
            present: false,
            status: None,
            docket_count: 0,
            last_sync: None,
            integrity: None,
            field_issues: Vec::new(),
            needs_full_sync: true,
            needs_discovery: true,
        };

        match self.replicas.load_cache() {
            Ok(Some(record)) => {
                let history = history_of(&record);
                report.present = true;
                report.status = Some(assess(&record, now));
                report.docket_count = record.dockets.len();
                report.last_sync = Some(record.last_sync);
                report.field_issues = scan_field_issues(&record.dockets, now);
                report.needs_full_sync =
                    needs_full_sync(Some(&history), self.policy.max_sync_age_days, now);
                report.needs_discovery =
                    needs_discovery(Some(&history), self.policy.max_discovery_age_days, now);
                report.integrity = record.integrity;
            }
            Ok(None) => {}
            Err(e) => {
                report.present = true;
                report.status = Some(IntegrityStatus::Corrupted {
                    reason: e.to_string(),
                });
            }
        }

        report
    }

    /// Refresh the shared cache from the docket source.
    ///
    /// Plans a discovery, full or incremental pass from the current cache
    /// history. A result that looks truncated against the peak count is
    /// re-fetched once; if it still looks truncated the previous record is
    /// kept. Incremental passes merge over the previous docket set.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential, the source or the final cache
    /// write fails. The previous record is untouched in each case.
    pub async fn refresh_cache(&mut self, force: bool) -> SyncResult<RefreshOutcome> {
        if !self.replicas.is_reachable() {
            info!("Shared volume unreachable, skipping refresh");
            return Ok(RefreshOutcome::Unavailable);
        }

        let now = Utc::now();
        let previous = self.load_cache();
        let history = previous.as_ref().map(history_of);
        let plan = plan_refresh(history.as_ref(), &self.policy, force, now);
        info!(%plan, force, "Refreshing docket cache");

        let token = match self.source.credential_key().map(str::to_string) {
            Some(key) => Some(self.credentials.token(&key).await?),
            None => None,
        };

        let containers = match plan {
            RefreshPlan::Discovery => self.source.list_upstream_containers(token.as_deref()).await?,
            RefreshPlan::Full | RefreshPlan::Incremental => history
                .as_ref()
                .and_then(|h| h.discovered_source_ids.clone())
                .unwrap_or_default(),
        };

        let base = match (plan, previous) {
            (RefreshPlan::Incremental, Some(record)) => record.dockets,
            _ => Vec::new(),
        };

        let threshold = self.policy.incomplete_threshold;
        let (fetched, mut bearing) = fetch_from(&self.source, &containers, token.as_deref()).await?;
        let mut items = dedupe(base.clone(), fetched);

        if appears_incomplete(history.as_ref(), items.len(), threshold) {
            warn!(found = items.len(), "Fetched dockets look truncated, retrying once");
            let (fetched, retried) = fetch_from(&self.source, &containers, token.as_deref()).await?;
            items = dedupe(base, fetched);
            bearing = retried;

            if appears_incomplete(history.as_ref(), items.len(), threshold) {
                let peak = history.as_ref().map_or(0, effective_peak);
                let found = items.len();
                warn!(found, peak, "Still truncated, keeping previous cache");
                self.record(
                    &Event::new(CACHE_SUBJECT, EventType::CacheKeptPrevious)
                        .with_detail(&SyncError::IncompleteSyncResult { found, peak }.to_string()),
                );
                return Ok(RefreshOutcome::KeptPrevious { found, peak });
            }
        }

        // Discovery narrows the known containers to those that yielded dockets.
        let source_ids = if plan == RefreshPlan::Discovery {
            let narrowed: Vec<String> = containers
                .iter()
                .filter(|c| bearing.contains(c.as_str()))
                .cloned()
                .collect();
            if narrowed.is_empty() { containers } else { narrowed }
        } else {
            containers
        };

        let record = CacheRecord {
            integrity: Some(next_metadata(history.as_ref(), &items, plan, &source_ids, now)),
            dockets: items,
            last_sync: now,
        };
        self.replicas.save_cache(&record)?;

        let count = record.dockets.len();
        info!(count, %plan, "Wrote docket cache");
        self.record(
            &Event::new(CACHE_SUBJECT, EventType::CacheWritten)
                .with_status(&plan.to_string())
                .with_detail(&format!("{count} dockets")),
        );
        Ok(RefreshOutcome::Written { count, plan })
    }

    // ── Settings ──────────────────────────────────────────────

    fn session(&mut self, owner_id: &str) -> &mut SessionSync {
        self.sessions
            .entry(owner_id.to_string())
            .or_insert_with(|| SessionSync::new(owner_id))
    }

    /// Current session status for an owner.
    #[must_use]
    pub fn status(&self, owner_id: &str) -> SyncStatus {
        self.sessions
            .get(owner_id)
            .map_or(SyncStatus::Unknown, |s| s.status().clone())
    }

    /// Settle the session and persist its events.
    fn settle(&mut self, owner_id: &str, status: SyncStatus) -> SyncResult<Vec<SyncEvent>> {
        let session = self.session(owner_id);
        session.transition(status)?;
        let events = session.take_events();

        for event in &events {
            let row = match event {
                SyncEvent::Status { status, .. } => {
                    let row = Event::new(owner_id, EventType::StatusChanged).with_status(status.label());
                    match status {
                        SyncStatus::SyncFailed(detail) | SyncStatus::Conflict(detail) => {
                            row.with_detail(detail)
                        }
                        _ => row,
                    }
                }
                SyncEvent::Conflict {
                    resolution,
                    delta_ms,
                    ..
                } => Event::new(owner_id, EventType::ConflictResolved)
                    .with_status(&format!("{resolution:?}"))
                    .with_detail(&format!("delta_ms={delta_ms}")),
            };
            self.record(&row);
        }

        Ok(events)
    }

    /// Settings for an owner: the local copy, else the shared copy.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID or a failing local database.
    pub fn load_settings(&mut self, owner_id: &str) -> SyncResult<Option<Value>> {
        check_owner(owner_id)?;
        if let Some(local) = self.local.get_settings(owner_id).map_err(local_err)? {
            return Ok(Some(local.blob));
        }
        Ok(self.load_shared(owner_id).map(|s| s.blob))
    }

    fn load_shared(&self, owner_id: &str) -> Option<SettingsReplica> {
        match self.replicas.load_settings(owner_id) {
            Ok(shared) => shared,
            Err(e) => {
                warn!(owner = owner_id, error = %e, "Shared settings unreadable");
                None
            }
        }
    }

    /// Save a user edit.
    ///
    /// The value is written locally first and is never rejected because of
    /// the shared volume. Publishing failures leave the session `SyncFailed`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID or if the local write fails.
    pub fn save_settings(&mut self, owner_id: &str, blob: Value) -> SyncResult<SettingsSyncReport> {
        check_owner(owner_id)?;
        self.session(owner_id).transition(SyncStatus::Syncing)?;

        if let Err(e) = self.local.put_settings(owner_id, &blob, Utc::now()) {
            let err = local_err(e);
            self.settle(owner_id, SyncStatus::SyncFailed(err.to_string()))?;
            return Err(err);
        }

        let status = self.publish(owner_id, &blob);
        let events = self.settle(owner_id, status.clone())?;
        Ok(SettingsSyncReport {
            owner_id: owner_id.to_string(),
            status,
            resolution: None,
            blob,
            events,
        })
    }

    /// Write the local value to shared storage and move the baseline.
    fn publish(&mut self, owner_id: &str, blob: &Value) -> SyncStatus {
        if !self.replicas.is_reachable() {
            debug!(owner = owner_id, "Shared volume unreachable, settings kept local");
            return SyncStatus::LocalOnly;
        }

        match self.replicas.save_settings(owner_id, blob) {
            Ok(written_at) => match self.local.mark_published(owner_id, written_at) {
                Ok(()) => SyncStatus::Synced,
                Err(e) => SyncStatus::SyncFailed(local_err(e).to_string()),
            },
            Err(e) => {
                let err = SyncError::Propagation(e.to_string());
                warn!(owner = owner_id, error = %err, "Settings publish failed");
                SyncStatus::SyncFailed(err.to_string())
            }
        }
    }

    /// Reconcile local and shared settings at session start.
    ///
    /// Resolution is whole-blob last-write-wins with a race window that
    /// prefers the shared copy. Every resolution converges the local copy;
    /// a local win is written back to shared storage.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID or a failing local database.
    pub fn resolve_and_sync(&mut self, owner_id: &str) -> SyncResult<SettingsSyncReport> {
        check_owner(owner_id)?;
        self.session(owner_id).transition(SyncStatus::Syncing)?;

        let outcome = self.resolve_inner(owner_id);
        let (status, resolution, blob) = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.settle(owner_id, SyncStatus::SyncFailed(err.to_string()))?;
                return Err(err);
            }
        };

        let events = self.settle(owner_id, status.clone())?;
        info!(owner = owner_id, %status, ?resolution, "Settings resolved");
        Ok(SettingsSyncReport {
            owner_id: owner_id.to_string(),
            status,
            resolution: Some(resolution),
            blob,
            events,
        })
    }

    fn resolve_inner(&mut self, owner_id: &str) -> SyncResult<(SyncStatus, Resolution, Value)> {
        let local: Option<LocalSettings> = self.local.get_settings(owner_id).map_err(local_err)?;
        let shared = if self.replicas.is_reachable() {
            self.load_shared(owner_id)
        } else {
            None
        };

        let decision = self.resolver.resolve(local.as_ref(), shared.as_ref());
        if decision.is_conflict() {
            self.session(owner_id).conflict(&decision)?;
        }

        let status = match decision.resolution {
            Resolution::LocalOnly => SyncStatus::LocalOnly,
            Resolution::InSync => {
                if let Some(baseline) = decision.baseline {
                    self.local.set_baseline(owner_id, baseline).map_err(local_err)?;
                }
                SyncStatus::Synced
            }
            Resolution::AdoptedShared | Resolution::RaceWindowShared | Resolution::UsedShared => {
                let baseline = decision.baseline.unwrap_or_else(Utc::now);
                self.local
                    .put_settings(owner_id, &decision.blob, baseline)
                    .map_err(local_err)?;
                SyncStatus::Synced
            }
            Resolution::UsedLocal => self.publish(owner_id, &decision.blob),
        };

        Ok((status, decision.resolution, decision.blob))
    }

    /// Remove an owner's settings everywhere.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID, a failing local database, or
    /// a failed shared removal.
    pub fn delete_settings(&mut self, owner_id: &str) -> SyncResult<bool> {
        check_owner(owner_id)?;
        let local = self.local.delete_settings(owner_id).map_err(local_err)?;
        let shared = if self.replicas.is_reachable() {
            self.replicas
                .delete_settings(owner_id)
                .map_err(|e| SyncError::Propagation(e.to_string()))?
        } else {
            false
        };
        self.sessions.remove(owner_id);
        Ok(local || shared)
    }

    /// Owners known locally or on the shared volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the local database cannot be read.
    pub fn list_owner_ids(&self) -> SyncResult<Vec<String>> {
        let mut ids: BTreeSet<String> =
            self.local.list_owner_ids().map_err(local_err)?.into_iter().collect();
        match self.replicas.list_owner_ids() {
            Ok(shared) => ids.extend(shared),
            Err(e) => warn!(error = %e, "Could not list shared settings"),
        }
        Ok(ids.into_iter().collect())
    }

    /// Recent audit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the local database cannot be read.
    pub fn recent_events(&self, subject: Option<&str>, limit: u32) -> SyncResult<Vec<Event>> {
        self.local.recent_events(subject, limit).map_err(local_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::provider::{DirectorySource, EnvCredentialStore};
    use crate::sync::replica::{DEFAULT_CACHE_FILE, DEFAULT_SETTINGS_DIR};
    use crate::sync::store::{FsSharedStore, StoredValue};
    use chrono::Duration;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    /// Source that replays queued batches; the last batch repeats.
    struct ScriptedSource {
        containers: Vec<String>,
        batches: Mutex<VecDeque<Vec<DocketRecord>>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(containers: &[&str], batches: Vec<Vec<DocketRecord>>) -> Self {
            Self {
                containers: containers.iter().map(|c| (*c).to_string()).collect(),
                batches: Mutex::new(batches.into()),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    impl DocketSource for ScriptedSource {
        async fn list_upstream_containers(&self, _token: Option<&str>) -> SyncResult<Vec<String>> {
            Ok(self.containers.clone())
        }

        async fn fetch_dockets(
            &self,
            _container_ids: &[String],
            _token: Option<&str>,
        ) -> SyncResult<Vec<ContainerBatch>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let dockets = {
                let mut queued = self.batches.lock().unwrap();
                if queued.len() > 1 {
                    queued.pop_front().unwrap()
                } else {
                    queued.front().cloned().unwrap_or_default()
                }
            };

            // Scripted dockets are stamped with the container they belong to.
            let mut batches: Vec<ContainerBatch> = Vec::new();
            for docket in dockets {
                let id = docket.source_id.clone().unwrap_or_default();
                match batches.iter_mut().find(|b| b.container_id == id) {
                    Some(batch) => batch.dockets.push(docket),
                    None => batches.push(ContainerBatch::new(&id, vec![docket])),
                }
            }
            Ok(batches)
        }
    }

    type TestEngine = SyncEngine<FsSharedStore, ScriptedSource, EnvCredentialStore>;

    fn dockets(n: usize, source: &str) -> Vec<DocketRecord> {
        (0..n)
            .map(|i| DocketRecord::new(&format!("{}", 25000 + i), "Spot").with_source(source))
            .collect()
    }

    fn engine(root: &std::path::Path, source: ScriptedSource) -> TestEngine {
        SyncEngine::new(
            ReplicaStore::new(FsSharedStore::new(root)),
            LocalStore::open_memory().unwrap(),
            source,
            Arc::new(CredentialGate::new(EnvCredentialStore)),
        )
    }

    fn idle_engine(root: &std::path::Path) -> TestEngine {
        engine(root, ScriptedSource::new(&[], vec![]))
    }

    fn seed_cache(dir: &TempDir, count: usize, peak: usize, full_sync_age_days: i64) {
        let now = Utc::now();
        let items = dockets(count, "proj");
        let mut meta = compute_metadata(&items, now);
        meta.peak_item_count = Some(peak);
        meta.last_full_sync_at = Some(now - Duration::days(full_sync_age_days));
        meta.last_discovery_at = Some(now - Duration::days(1));
        meta.discovered_source_ids = Some(vec!["proj".into()]);
        let record = CacheRecord {
            dockets: items,
            last_sync: now - Duration::days(1),
            integrity: Some(meta),
        };
        ReplicaStore::new(FsSharedStore::new(dir.path()))
            .save_cache(&record)
            .unwrap();
    }

    fn settings_path(dir: &TempDir, owner: &str) -> std::path::PathBuf {
        dir.path().join(DEFAULT_SETTINGS_DIR).join(format!("{owner}.json"))
    }

    fn set_mtime(path: &std::path::Path, at: DateTime<Utc>) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::from(at)).unwrap();
    }

    #[tokio::test]
    async fn test_refresh_keeps_peak_monotonic() {
        let dir = TempDir::new().unwrap();
        seed_cache(&dir, 198, 200, 8);

        let mut engine = engine(dir.path(), ScriptedSource::new(&["proj"], vec![dockets(199, "proj")]));
        let outcome = engine.refresh_cache(false).await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Written {
                count: 199,
                plan: RefreshPlan::Full
            }
        );

        let record = engine.load_cache().unwrap();
        let meta = record.integrity.unwrap();
        assert_eq!(meta.item_count, 199);
        assert_eq!(meta.peak_item_count, Some(200));
        assert!(meta.last_full_sync_at.unwrap() > Utc::now() - Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_truncated_result_retried_then_kept_previous() {
        let dir = TempDir::new().unwrap();
        seed_cache(&dir, 198, 200, 8);
        let before = fs::read(dir.path().join(DEFAULT_CACHE_FILE)).unwrap();

        let mut engine = engine(dir.path(), ScriptedSource::new(&["proj"], vec![dockets(50, "proj")]));
        let outcome = engine.refresh_cache(false).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::KeptPrevious { found: 50, peak: 200 });
        assert_eq!(engine.source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(fs::read(dir.path().join(DEFAULT_CACHE_FILE)).unwrap(), before);

        let events = engine.recent_events(Some(CACHE_SUBJECT), 5).unwrap();
        assert_eq!(events[0].event_type, EventType::CacheKeptPrevious);
    }

    #[tokio::test]
    async fn test_truncated_result_recovers_on_retry() {
        let dir = TempDir::new().unwrap();
        seed_cache(&dir, 198, 200, 8);

        let source = ScriptedSource::new(&["proj"], vec![dockets(50, "proj"), dockets(201, "proj")]);
        let mut engine = engine(dir.path(), source);
        let outcome = engine.refresh_cache(false).await.unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome::Written {
                count: 201,
                plan: RefreshPlan::Full
            }
        );
        let meta = engine.load_cache().unwrap().integrity.unwrap();
        assert_eq!(meta.peak_item_count, Some(201));
    }

    #[tokio::test]
    async fn test_corrupted_cache_discarded_and_rediscovered() {
        let dir = TempDir::new().unwrap();
        seed_cache(&dir, 10, 10, 1);
        let path = dir.path().join(DEFAULT_CACHE_FILE);
        let mut value: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["dockets"][0]["fullName"] = json!("00000_Tampered");
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let source = ScriptedSource::new(&["proj", "empty"], vec![dockets(12, "proj")]);
        let mut engine = engine(dir.path(), source);
        assert!(engine.load_cache().is_none());

        let outcome = engine.refresh_cache(false).await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Written {
                count: 12,
                plan: RefreshPlan::Discovery
            }
        );
        let meta = engine.load_cache().unwrap().integrity.unwrap();
        assert_eq!(meta.discovered_source_ids, Some(vec!["proj".to_string()]));
        assert!(meta.last_discovery_at.is_some());
    }

    #[tokio::test]
    async fn test_incremental_merges_previous_dockets() {
        let dir = TempDir::new().unwrap();
        seed_cache(&dir, 5, 5, 1);

        let update = vec![DocketRecord::new("30000", "Launch").with_source("proj")];
        let mut engine = engine(dir.path(), ScriptedSource::new(&["proj"], vec![update]));
        let outcome = engine.refresh_cache(false).await.unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome::Written {
                count: 6,
                plan: RefreshPlan::Incremental
            }
        );
    }

    #[tokio::test]
    async fn test_discovery_keeps_container_with_foreign_source_id() {
        let shared = TempDir::new().unwrap();
        let upstream = TempDir::new().unwrap();
        let a = vec![DocketRecord::new("1", "Promo"), DocketRecord::new("2", "Spot")];
        let b = vec![DocketRecord::new("3", "Trailer").with_source("custom")];
        fs::write(upstream.path().join("proj_a.json"), serde_json::to_vec(&a).unwrap()).unwrap();
        fs::write(upstream.path().join("proj_b.json"), serde_json::to_vec(&b).unwrap()).unwrap();

        let mut engine = SyncEngine::new(
            ReplicaStore::new(FsSharedStore::new(shared.path())),
            LocalStore::open_memory().unwrap(),
            DirectorySource::new(upstream.path()),
            Arc::new(CredentialGate::new(EnvCredentialStore)),
        );

        let first = engine.refresh_cache(false).await.unwrap();
        assert_eq!(
            first,
            RefreshOutcome::Written {
                count: 3,
                plan: RefreshPlan::Discovery
            }
        );
        let mut record = engine.load_cache().unwrap();
        let meta = record.integrity.as_mut().unwrap();
        assert_eq!(
            meta.discovered_source_ids,
            Some(vec!["proj_a".to_string(), "proj_b".to_string()])
        );

        // Age the full sync so the next pass re-fetches only known containers.
        meta.last_full_sync_at = Some(Utc::now() - Duration::days(8));
        engine.replicas.save_cache(&record).unwrap();

        let second = engine.refresh_cache(false).await.unwrap();
        assert_eq!(
            second,
            RefreshOutcome::Written {
                count: 3,
                plan: RefreshPlan::Full
            }
        );
        let names: Vec<String> = engine
            .load_cache()
            .unwrap()
            .dockets
            .into_iter()
            .map(|d| d.full_name)
            .collect();
        assert_eq!(names, vec!["1_Promo", "2_Spot", "3_Trailer"]);
    }

    #[tokio::test]
    async fn test_refresh_unreachable_volume() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(&dir.path().join("offline"));
        assert_eq!(
            engine.refresh_cache(true).await.unwrap(),
            RefreshOutcome::Unavailable
        );
    }

    #[test]
    fn test_inspect_reports_count_mismatch() {
        let dir = TempDir::new().unwrap();
        seed_cache(&dir, 4, 4, 8);
        let path = dir.path().join(DEFAULT_CACHE_FILE);
        let mut value: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["dockets"].as_array_mut().unwrap().pop();
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let report = idle_engine(dir.path()).inspect_cache();
        assert!(report.present);
        assert_eq!(
            report.status,
            Some(IntegrityStatus::CountMismatch {
                found: 3,
                expected: 4
            })
        );
        assert!(report.needs_full_sync);
        assert!(!report.needs_discovery);
    }

    #[test]
    fn test_shared_newer_is_adopted() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());
        let t0 = Utc::now() - Duration::minutes(10);

        engine.local.put_settings("alice", &json!("A"), t0).unwrap();
        engine.replicas.save_settings("alice", &json!("B")).unwrap();
        set_mtime(&settings_path(&dir, "alice"), t0 + Duration::seconds(5));

        let report = engine.resolve_and_sync("alice").unwrap();
        assert_eq!(report.resolution, Some(Resolution::UsedShared));
        assert_eq!(report.status, SyncStatus::Synced);
        assert_eq!(report.blob, json!("B"));
        assert_eq!(engine.local.get_settings("alice").unwrap().unwrap().blob, json!("B"));
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, SyncEvent::Conflict { delta_ms: 5000, .. })));
    }

    #[test]
    fn test_local_newer_is_written_back() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());
        let t0 = Utc::now() - Duration::minutes(10);

        engine.local.put_settings("alice", &json!("A"), t0).unwrap();
        engine.replicas.save_settings("alice", &json!("B")).unwrap();
        set_mtime(&settings_path(&dir, "alice"), t0 - Duration::seconds(5));

        let report = engine.resolve_and_sync("alice").unwrap();
        assert_eq!(report.resolution, Some(Resolution::UsedLocal));
        assert_eq!(report.status, SyncStatus::Synced);
        assert_eq!(report.blob, json!("A"));

        let shared = engine.replicas.load_settings("alice").unwrap().unwrap();
        assert_eq!(shared.blob, json!("A"));
        assert!(engine.local.published_at("alice").unwrap().is_some());
        assert_eq!(
            engine.local.get_settings("alice").unwrap().unwrap().last_accessed_at.timestamp_millis(),
            shared.store_modified_at.timestamp_millis()
        );
    }

    #[test]
    fn test_race_window_prefers_shared() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());
        let t0 = Utc::now() - Duration::minutes(10);

        engine.local.put_settings("alice", &json!("A"), t0).unwrap();
        engine.replicas.save_settings("alice", &json!("B")).unwrap();
        set_mtime(&settings_path(&dir, "alice"), t0 + Duration::milliseconds(300));

        let report = engine.resolve_and_sync("alice").unwrap();
        assert_eq!(report.resolution, Some(Resolution::RaceWindowShared));
        assert_eq!(report.blob, json!("B"));
        assert!(report.events.iter().all(|e| !matches!(e, SyncEvent::Conflict { .. })));
    }

    #[test]
    fn test_equal_content_only_moves_baseline() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());
        let t0 = Utc::now() - Duration::minutes(10);

        engine.local.put_settings("alice", &json!({"a": 1}), t0).unwrap();
        let written_at = engine.replicas.save_settings("alice", &json!({"a": 1})).unwrap();

        let report = engine.resolve_and_sync("alice").unwrap();
        assert_eq!(report.resolution, Some(Resolution::InSync));
        assert_eq!(
            engine.local.get_settings("alice").unwrap().unwrap().last_accessed_at.timestamp_millis(),
            written_at.timestamp_millis()
        );
    }

    #[test]
    fn test_unreachable_volume_is_local_only() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(&dir.path().join("offline"));

        let saved = engine.save_settings("bob", json!({"theme": "dark"})).unwrap();
        assert_eq!(saved.status, SyncStatus::LocalOnly);
        assert_eq!(
            engine.load_settings("bob").unwrap(),
            Some(json!({"theme": "dark"}))
        );

        let resolved = engine.resolve_and_sync("bob").unwrap();
        assert_eq!(resolved.resolution, Some(Resolution::LocalOnly));
        assert_eq!(engine.status("bob"), SyncStatus::LocalOnly);
    }

    #[test]
    fn test_save_publishes_through_obstructing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DEFAULT_SETTINGS_DIR), "old format").unwrap();
        let mut engine = idle_engine(dir.path());

        let report = engine.save_settings("carol", json!({"k": "v"})).unwrap();
        assert_eq!(report.status, SyncStatus::Synced);
        assert!(dir.path().join(format!("{DEFAULT_SETTINGS_DIR}.old")).is_file());
        assert_eq!(engine.list_owner_ids().unwrap(), vec!["carol"]);
    }

    #[test]
    fn test_failed_publish_keeps_local_edit() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(settings_path(&dir, "dave")).unwrap();
        let mut engine = idle_engine(dir.path());

        let report = engine.save_settings("dave", json!({"k": 1})).unwrap();
        assert!(matches!(report.status, SyncStatus::SyncFailed(_)));
        assert_eq!(engine.load_settings("dave").unwrap(), Some(json!({"k": 1})));

        let events = engine.recent_events(Some("dave"), 10).unwrap();
        assert!(events
            .iter()
            .any(|e| e.status.as_deref() == Some("sync_failed")));
    }

    /// Shared store that serves reads but refuses every write.
    struct ReadOnlyStore(FsSharedStore);

    impl SharedStore for ReadOnlyStore {
        fn is_reachable(&self) -> bool {
            self.0.is_reachable()
        }

        fn get(&self, key: &str) -> SyncResult<Option<StoredValue>> {
            self.0.get(key)
        }

        fn put(&self, key: &str, _bytes: &[u8]) -> SyncResult<()> {
            Err(SyncError::StorageUnavailable(format!("{key}: read-only volume")))
        }

        fn list(&self, namespace: &str) -> SyncResult<Vec<String>> {
            self.0.list(namespace)
        }

        fn delete(&self, key: &str) -> SyncResult<bool> {
            self.0.delete(key)
        }
    }

    #[test]
    fn test_local_newer_write_back_failure_is_sync_failed() {
        let dir = TempDir::new().unwrap();
        let t0 = Utc::now() - Duration::minutes(10);
        ReplicaStore::new(FsSharedStore::new(dir.path()))
            .save_settings("alice", &json!("B"))
            .unwrap();
        set_mtime(&settings_path(&dir, "alice"), t0 - Duration::seconds(5));

        let mut engine = SyncEngine::new(
            ReplicaStore::new(ReadOnlyStore(FsSharedStore::new(dir.path()))),
            LocalStore::open_memory().unwrap(),
            ScriptedSource::new(&[], vec![]),
            Arc::new(CredentialGate::new(EnvCredentialStore)),
        );
        engine.local.put_settings("alice", &json!("A"), t0).unwrap();

        let report = engine.resolve_and_sync("alice").unwrap();
        assert_eq!(report.resolution, Some(Resolution::UsedLocal));
        assert!(matches!(report.status, SyncStatus::SyncFailed(_)));
        assert_eq!(engine.status("alice"), report.status);

        let local = engine.local.get_settings("alice").unwrap().unwrap();
        assert_eq!(local.blob, json!("A"));
        assert!(engine.local.published_at("alice").unwrap().is_none());

        let shared = engine.replicas.load_settings("alice").unwrap().unwrap();
        assert_eq!(shared.blob, json!("B"));

        let labels: Vec<&str> = report
            .events
            .iter()
            .map(|e| match e {
                SyncEvent::Status { status, .. } => status.label(),
                SyncEvent::Conflict { .. } => "conflict_resolved",
            })
            .collect();
        assert_eq!(
            labels,
            vec!["syncing", "conflict_resolved", "conflict", "sync_failed"]
        );
        assert!(matches!(
            report.events[1],
            SyncEvent::Conflict {
                resolution: Resolution::UsedLocal,
                delta_ms,
                ..
            } if delta_ms < -1000
        ));
    }

    #[test]
    fn test_missing_everywhere_is_local_only_without_persisting() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());

        let report = engine.resolve_and_sync("erin").unwrap();
        assert_eq!(report.status, SyncStatus::LocalOnly);
        assert_eq!(report.blob, json!({}));
        assert!(engine.local.get_settings("erin").unwrap().is_none());
    }

    #[test]
    fn test_delete_and_list() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());
        engine.save_settings("frank", json!({})).unwrap();
        engine.replicas.save_settings("gina", &json!({})).unwrap();

        assert_eq!(engine.list_owner_ids().unwrap(), vec!["frank", "gina"]);
        assert!(engine.delete_settings("frank").unwrap());
        assert!(!engine.delete_settings("frank").unwrap());
        assert_eq!(engine.list_owner_ids().unwrap(), vec!["gina"]);
    }

    #[test]
    fn test_invalid_owner_rejected() {
        let dir = TempDir::new().unwrap();
        let mut engine = idle_engine(dir.path());
        assert!(matches!(
            engine.save_settings("a/b", json!({})),
            Err(SyncError::InvalidOwnerId(_))
        ));
        assert_eq!(engine.status("a/b"), SyncStatus::Unknown);
    }
}
