//! Per-user settings replicas.
//!
//! The settings blob is opaque application configuration. This layer only
//! compares it for equality and moves it between the device-local copy and
//! the shared volume.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A settings copy read from the shared volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsReplica {
    pub owner_id: String,
    pub blob: Value,
    /// Modification time of the underlying shared file.
    pub store_modified_at: DateTime<Utc>,
}

/// The device-local settings copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalSettings {
    pub owner_id: String,
    pub blob: Value,
    /// Timestamp baseline used as the local modification time during
    /// conflict resolution.
    pub last_accessed_at: DateTime<Utc>,
}

/// Check that an owner ID can be used as a file stem on the shared volume.
///
/// Rejects empty IDs, path separators and characters that are invalid on
/// common SMB shares.
#[must_use]
pub fn is_valid_owner_id(owner_id: &str) -> bool {
    let trimmed = owner_id.trim();
    !trimmed.is_empty()
        && trimmed == owner_id
        && owner_id != "."
        && owner_id != ".."
        && !owner_id.chars().any(|c| {
            matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_id_validation() {
        assert!(is_valid_owner_id("alice"));
        assert!(is_valid_owner_id("j.smith"));
        assert!(!is_valid_owner_id(""));
        assert!(!is_valid_owner_id(" alice"));
        assert!(!is_valid_owner_id("../etc"));
        assert!(!is_valid_owner_id("a/b"));
        assert!(!is_valid_owner_id(".."));
    }
}
