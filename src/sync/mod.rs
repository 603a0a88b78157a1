//! Shared-volume sync for the docket cache and user settings.
//!
//! Two kinds of replica live on a directory that several machines mount:
//!
//! - **Cache**: one checksummed JSON record holding every docket, rebuilt
//!   from the docket source by [`SyncEngine::refresh_cache`]
//! - **Settings**: one JSON file per user, reconciled with the device-local
//!   copy by last-write-wins
//!
//! # Architecture
//!
//! ```text
//! SyncService ──commands──▶ SyncEngine ─┬─▶ ReplicaStore ─▶ SharedStore (mounted dir)
//!                                       ├─▶ LocalStore (SQLite)
//!                                       └─▶ DocketSource + CredentialGate
//! ```
//!
//! Decision logic is kept free of I/O: [`integrity`] classifies records,
//! [`coordinator`] plans refreshes and [`resolver`] picks a settings winner.
//!
//! # File Layout
//!
//! ```text
//! <shared-root>/
//!   docket_cache.json
//!   user_settings/
//!     <owner>.json
//! ```

pub mod coordinator;
pub mod engine;
mod file;
pub mod integrity;
pub mod provider;
pub mod replica;
pub mod resolver;
pub mod service;
pub mod status;
pub mod store;
mod types;

pub use coordinator::SyncPolicy;
pub use engine::{CacheReport, SettingsSyncReport, SyncEngine};
pub use provider::{
    ContainerBatch, CredentialGate, CredentialStore, DirectorySource, DocketSource,
    EnvCredentialStore,
};
pub use replica::{ReplicaStore, DEFAULT_CACHE_FILE, DEFAULT_SETTINGS_DIR};
pub use resolver::{ConflictResolver, Decision, SessionSync};
pub use service::{spawn, SyncService};
pub use store::{FsSharedStore, SharedStore, StoredValue};
pub use types::{
    CacheRecord, FieldIssue, FieldIssueKind, IntegrityMetadata, IntegrityStatus, RefreshOutcome,
    RefreshPlan, Resolution, SyncError, SyncEvent, SyncResult, SyncStatus, CACHE_FORMAT_VERSION,
};
