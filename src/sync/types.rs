//! Sync types for the shared-volume cache and settings replicas.
//!
//! This module defines the on-disk cache record, its integrity metadata,
//! and the status/outcome types reported back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::DocketRecord;

/// Current cache format version. Bumped on breaking schema changes.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Versioned, checksummed snapshot of docket data.
///
/// A cache record is produced by a sync pass, read on every start and
/// superseded by the next pass. It is never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    /// The docket set.
    pub dockets: Vec<DocketRecord>,
    /// When the sync pass that produced this record finished.
    pub last_sync: DateTime<Utc>,
    /// Absent on legacy records; usable but unverified.
    #[serde(default)]
    pub integrity: Option<IntegrityMetadata>,
}

/// Integrity and sync-history metadata attached to a cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityMetadata {
    /// Format version the record was written with.
    pub version: u32,
    /// Docket count at the time of computation.
    #[serde(rename = "docketCount")]
    pub item_count: usize,
    /// Hex SHA256 over the sorted, deduplicated docket keys.
    pub checksum: String,
    #[serde(rename = "computedAt")]
    pub computed_at: DateTime<Utc>,
    /// Historical maximum docket count for this cache.
    #[serde(rename = "peakDocketCount", default)]
    pub peak_item_count: Option<usize>,
    /// Last sync that scanned the entire source.
    #[serde(rename = "lastFullSyncDate", default)]
    pub last_full_sync_at: Option<DateTime<Utc>>,
    /// Upstream containers known to yield dockets.
    #[serde(rename = "docketBearingProjectIDs", default)]
    pub discovered_source_ids: Option<Vec<String>>,
    /// Last full discovery pass over all upstream containers.
    #[serde(rename = "lastDiscoveryDate", default)]
    pub last_discovery_at: Option<DateTime<Utc>>,
}

/// Classification of a cache record against its integrity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Metadata present and consistent.
    Valid,
    /// Legacy record without metadata.
    MissingIntegrity,
    /// Written by a different format version.
    VersionMismatch { found: u32, expected: u32 },
    /// Docket count differs from the recorded count.
    CountMismatch { found: usize, expected: usize },
    /// Checksum over docket keys differs.
    ChecksumMismatch,
    /// Undecodable or structurally bad data.
    Corrupted { reason: String },
}

impl IntegrityStatus {
    /// Whether the record can be used as-is.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid | Self::MissingIntegrity)
    }
}

impl std::fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::MissingIntegrity => write!(f, "missing integrity metadata"),
            Self::VersionMismatch { found, expected } => {
                write!(f, "version mismatch (found {found}, expected {expected})")
            }
            Self::CountMismatch { found, expected } => {
                write!(f, "count mismatch (found {found}, expected {expected})")
            }
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::Corrupted { reason } => write!(f, "corrupted: {reason}"),
        }
    }
}

/// A structural problem found in a single docket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// Key of the affected docket (may be empty if the key itself is missing).
    pub full_name: String,
    /// Index of the docket in the record.
    pub index: usize,
    pub kind: FieldIssueKind,
}

/// Kinds of structural problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "field", rename_all = "snake_case")]
pub enum FieldIssueKind {
    /// A required field is empty.
    EmptyField(String),
    /// The derived key does not contain its source docket number.
    KeyMismatch,
    /// A date lies implausibly far in the future.
    FutureDate(String),
}

/// Per-session settings sync status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Unknown,
    Syncing,
    Synced,
    LocalOnly,
    SyncFailed(String),
    Conflict(String),
}

impl SyncStatus {
    /// Short label for display.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::LocalOnly => "local_only",
            Self::SyncFailed(_) => "sync_failed",
            Self::Conflict(_) => "conflict",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyncFailed(reason) => write!(f, "sync_failed: {reason}"),
            Self::Conflict(detail) => write!(f, "conflict: {detail}"),
            other => f.write_str(other.label()),
        }
    }
}

/// How a local/shared settings comparison was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// No shared replica; local stays authoritative.
    LocalOnly,
    /// Contents equal; only the timestamp baseline moved.
    InSync,
    /// No local replica existed; the shared one was adopted.
    AdoptedShared,
    /// Contents differ within the race window; shared preferred.
    RaceWindowShared,
    /// Shared replica was newer.
    UsedShared,
    /// Local replica was newer; written back to shared.
    UsedLocal,
}

/// Informational events produced while syncing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A conflicting edit was detected and auto-resolved.
    Conflict {
        owner_id: String,
        resolution: Resolution,
        /// Shared mtime minus local baseline, in milliseconds.
        delta_ms: i64,
    },
    /// The session status changed.
    Status { owner_id: String, status: SyncStatus },
}

/// Kind of fetch a refresh should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPlan {
    /// Re-enumerate every upstream container, then fetch from all of them.
    Discovery,
    /// Re-fetch everything from the known containers.
    Full,
    /// Fetch against previously known containers only.
    Incremental,
}

impl std::fmt::Display for RefreshPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

/// Result of a cache refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new cache record was written.
    Written { count: usize, plan: RefreshPlan },
    /// The fetched result looked truncated twice; the previous record stays.
    KeptPrevious { found: usize, peak: usize },
    /// Another refresh was already in progress.
    AlreadyRunning,
    /// The shared volume is unreachable.
    Unavailable,
}

/// Sync-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Shared volume missing or unreachable.
    #[error("Shared storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Cache failed integrity classification.
    #[error("Corrupted cache: {0}")]
    CorruptedCache(IntegrityStatus),

    /// Fetched docket set looks truncated relative to the peak count.
    #[error("Incomplete sync result: {found} dockets against peak {peak}")]
    IncompleteSyncResult { found: usize, peak: usize },

    /// Write-back to shared storage failed.
    #[error("Propagation to shared storage failed: {0}")]
    Propagation(String),

    /// Stored content could not be decoded.
    #[error("Decode failure: {0}")]
    Decode(String),

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local database error.
    #[error("Database error: {0}")]
    Database(String),

    /// No credential available for the docket source.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The docket source failed.
    #[error("Docket source error: {0}")]
    Source(String),

    /// Illegal sync status transition.
    #[error("Invalid sync status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The owner ID cannot be used as a settings key.
    #[error("Invalid owner ID: {0:?}")]
    InvalidOwnerId(String),

    /// The sync service task has stopped.
    #[error("Sync service stopped")]
    ServiceStopped,
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
