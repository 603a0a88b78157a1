//! Settings conflict resolution.
//!
//! Compares the device-local settings copy against the shared copy using
//! only content equality and modification times. Whole-blob last-write-wins;
//! there is no field-level merge.
//!
//! Writes that land within the race window of each other are ambiguous, since
//! another machine may have just written. The shared value wins those.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::model::{LocalSettings, SettingsReplica};
use crate::sync::types::{Resolution, SyncError, SyncEvent, SyncResult, SyncStatus};

/// Default tolerance for near-simultaneous writes.
pub const DEFAULT_RACE_WINDOW_MS: i64 = 1000;

/// What to do after comparing local and shared settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub resolution: Resolution,
    /// The value the local copy should hold afterwards.
    pub blob: Value,
    /// New local timestamp baseline, if it should move now.
    pub baseline: Option<DateTime<Utc>>,
    /// Shared mtime minus local baseline, in milliseconds (0 if not compared).
    pub delta_ms: i64,
    /// Whether the local value must be written back to shared storage.
    pub write_back: bool,
}

impl Decision {
    /// Whether the outcome should be surfaced as a conflict event.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self.resolution,
            Resolution::UsedShared | Resolution::UsedLocal
        )
    }
}

/// Last-write-wins resolver with a race window.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    race_window: Duration,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_RACE_WINDOW_MS))
    }
}

impl ConflictResolver {
    /// Create a resolver with a custom race window.
    #[must_use]
    pub const fn new(race_window: Duration) -> Self {
        Self { race_window }
    }

    /// Decide between the local and shared settings.
    ///
    /// - No shared copy: local stays authoritative.
    /// - No local copy: the shared copy is adopted.
    /// - Equal content: only the baseline moves to the shared mtime.
    /// - Differing content within the race window: shared wins.
    /// - Otherwise the newer side wins; a local win requires write-back.
    #[must_use]
    pub fn resolve(
        &self,
        local: Option<&LocalSettings>,
        shared: Option<&SettingsReplica>,
    ) -> Decision {
        let Some(shared) = shared else {
            return Decision {
                resolution: Resolution::LocalOnly,
                blob: local.map_or_else(|| Value::Object(serde_json::Map::new()), |l| l.blob.clone()),
                baseline: None,
                delta_ms: 0,
                write_back: false,
            };
        };

        let adopt_shared = |resolution, delta_ms| Decision {
            resolution,
            blob: shared.blob.clone(),
            baseline: Some(shared.store_modified_at),
            delta_ms,
            write_back: false,
        };

        let Some(local) = local else {
            return adopt_shared(Resolution::AdoptedShared, 0);
        };

        if local.blob == shared.blob {
            return adopt_shared(Resolution::InSync, 0);
        }

        let delta = shared.store_modified_at - local.last_accessed_at;
        let delta_ms = delta.num_milliseconds();

        if delta.abs() <= self.race_window {
            adopt_shared(Resolution::RaceWindowShared, delta_ms)
        } else if delta > self.race_window {
            adopt_shared(Resolution::UsedShared, delta_ms)
        } else {
            Decision {
                resolution: Resolution::UsedLocal,
                blob: local.blob.clone(),
                baseline: None,
                delta_ms,
                write_back: true,
            }
        }
    }
}

/// Sync status state machine for one owner's session.
///
/// `Unknown -> Syncing -> {Synced, LocalOnly, SyncFailed, Conflict}`.
/// `Conflict` is transient and always moves on to `Synced`, `LocalOnly` or
/// `SyncFailed`. Settled states may start another `Syncing` round.
#[derive(Debug, Clone)]
pub struct SessionSync {
    owner_id: String,
    status: SyncStatus,
    events: Vec<SyncEvent>,
}

impl SessionSync {
    #[must_use]
    pub fn new(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            status: SyncStatus::Unknown,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    #[cfg(test)]
    fn events(&self) -> &[SyncEvent] {
        &self.events
    }

    /// Drain recorded events.
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    fn allowed(from: &SyncStatus, to: &SyncStatus) -> bool {
        use SyncStatus::{Conflict, LocalOnly, SyncFailed, Synced, Syncing, Unknown};
        match (from, to) {
            (Unknown | Synced | LocalOnly | SyncFailed(_), Syncing) => true,
            (Syncing, Synced | LocalOnly | SyncFailed(_) | Conflict(_)) => true,
            (Conflict(_), Synced | LocalOnly | SyncFailed(_)) => true,
            _ => false,
        }
    }

    /// Move to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTransition`] if the move is not allowed.
    pub fn transition(&mut self, next: SyncStatus) -> SyncResult<()> {
        if !Self::allowed(&self.status, &next) {
            return Err(SyncError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next.clone();
        self.events.push(SyncEvent::Status {
            owner_id: self.owner_id.clone(),
            status: next,
        });
        Ok(())
    }

    /// Record an informational conflict event and enter `Conflict`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the session is currently `Syncing`.
    pub fn conflict(&mut self, decision: &Decision) -> SyncResult<()> {
        self.events.push(SyncEvent::Conflict {
            owner_id: self.owner_id.clone(),
            resolution: decision.resolution,
            delta_ms: decision.delta_ms,
        });
        let detail = match decision.resolution {
            Resolution::UsedLocal => "local settings newer; publishing to shared storage",
            _ => "shared settings newer; adopted locally",
        };
        self.transition(SyncStatus::Conflict(detail.to_string()))
    }
}
