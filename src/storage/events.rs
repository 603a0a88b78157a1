//! Sync audit event storage and retrieval.
//!
//! Events record every status change, conflict and cache decision on this
//! device so that sync behaviour can be diagnosed after the fact.

use rusqlite::{Connection, Result};
use serde::Serialize;

/// Subject used for cache-level events.
pub const CACHE_SUBJECT: &str = "_cache";

/// Event types for the sync audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Settings events
    StatusChanged,
    ConflictResolved,
    SettingsSaved,
    SettingsPublished,
    SettingsDeleted,

    // Cache events
    CacheWritten,
    CacheDiscarded,
    CacheKeptPrevious,
}

impl EventType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChanged => "status_changed",
            Self::ConflictResolved => "conflict_resolved",
            Self::SettingsSaved => "settings_saved",
            Self::SettingsPublished => "settings_published",
            Self::SettingsDeleted => "settings_deleted",
            Self::CacheWritten => "cache_written",
            Self::CacheDiscarded => "cache_discarded",
            Self::CacheKeptPrevious => "cache_kept_previous",
        }
    }
}

/// An audit event record.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub subject: String,
    pub event_type: EventType,
    pub status: Option<String>,
    pub detail: Option<String>,
    pub created_at: i64,
}

impl Event {
    /// Create a new event (id will be assigned by database).
    #[must_use]
    pub fn new(subject: &str, event_type: EventType) -> Self {
        Self {
            id: 0,
            subject: subject.to_string(),
            event_type,
            status: None,
            detail: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach the status label in effect after the event.
    #[must_use]
    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    /// Attach free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_events (subject, event_type, status, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            event.subject,
            event.event_type.as_str(),
            event.status,
            event.detail,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get recent events, newest first, optionally filtered by subject.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_events(conn: &Connection, subject: Option<&str>, limit: Option<u32>) -> Result<Vec<Event>> {
    let limit = limit.unwrap_or(100);
    let mut stmt = conn.prepare(
        "SELECT id, subject, event_type, status, detail, created_at
         FROM sync_events
         WHERE ?1 IS NULL OR subject = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(rusqlite::params![subject, limit], |row| {
        Ok(Event {
            id: row.get(0)?,
            subject: row.get(1)?,
            event_type: parse_event_type(row.get::<_, String>(2)?.as_str()),
            status: row.get(3)?,
            detail: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    rows.collect()
}

fn parse_event_type(s: &str) -> EventType {
    match s {
        "conflict_resolved" => EventType::ConflictResolved,
        "settings_saved" => EventType::SettingsSaved,
        "settings_published" => EventType::SettingsPublished,
        "settings_deleted" => EventType::SettingsDeleted,
        "cache_written" => EventType::CacheWritten,
        "cache_discarded" => EventType::CacheDiscarded,
        "cache_kept_previous" => EventType::CacheKeptPrevious,
        _ => EventType::StatusChanged,
    }
}
