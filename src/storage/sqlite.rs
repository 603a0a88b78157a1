//! SQLite storage for the device-local replica.
//!
//! Local settings are always written here first, so a user edit is never
//! lost when the shared volume is unreachable. Mutations run in a single
//! transaction together with their audit events.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::LocalSettings;
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::schema::apply_schema;

/// SQLite-backed local replica store.
#[derive(Debug)]
pub struct LocalStore {
    conn: Connection,
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

impl LocalStore {
    /// Open a database at the given path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run a mutation and its audit events in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut Vec<Event>) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut events = Vec::new();

        let result = f(&tx, &mut events)?;
        for event in &events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(result)
    }

    /// Get the local settings for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored blob is not JSON.
    pub fn get_settings(&self, owner_id: &str) -> Result<Option<LocalSettings>> {
        let row = self
            .conn
            .query_row(
                "SELECT blob, last_accessed_at FROM local_settings WHERE owner_id = ?1",
                [owner_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let Some((blob, last_accessed_at)) = row else {
            return Ok(None);
        };

        Ok(Some(LocalSettings {
            owner_id: owner_id.to_string(),
            blob: serde_json::from_str(&blob)?,
            last_accessed_at: from_millis(last_accessed_at),
        }))
    }

    /// Insert or replace the local settings for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn put_settings(
        &mut self,
        owner_id: &str,
        blob: &Value,
        last_accessed_at: DateTime<Utc>,
    ) -> Result<()> {
        let text = serde_json::to_string(blob)?;
        let now = to_millis(Utc::now());

        self.mutate(|tx, events| {
            tx.execute(
                "INSERT INTO local_settings (owner_id, blob, last_accessed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(owner_id) DO UPDATE SET
                    blob = excluded.blob,
                    last_accessed_at = excluded.last_accessed_at,
                    updated_at = excluded.updated_at",
                rusqlite::params![owner_id, text, to_millis(last_accessed_at), now],
            )?;
            events.push(Event::new(owner_id, EventType::SettingsSaved));
            Ok(())
        })
    }

    /// Move the timestamp baseline without touching the blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_baseline(&mut self, owner_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE local_settings SET last_accessed_at = ?2 WHERE owner_id = ?1",
            rusqlite::params![owner_id, to_millis(at)],
        )?;
        Ok(changed > 0)
    }

    /// Record a successful publish to shared storage.
    ///
    /// The baseline moves to the shared file's mtime so the next session
    /// compares against what was actually written.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_published(&mut self, owner_id: &str, shared_modified_at: DateTime<Utc>) -> Result<()> {
        let now = to_millis(Utc::now());
        self.mutate(|tx, events| {
            tx.execute(
                "UPDATE local_settings SET last_accessed_at = ?2, published_at = ?3 WHERE owner_id = ?1",
                rusqlite::params![owner_id, to_millis(shared_modified_at), now],
            )?;
            events.push(Event::new(owner_id, EventType::SettingsPublished));
            Ok(())
        })
    }

    /// When the owner's settings were last published, if ever.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn published_at(&self, owner_id: &str) -> Result<Option<DateTime<Utc>>> {
        let value: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT published_at FROM local_settings WHERE owner_id = ?1",
                [owner_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten().map(from_millis))
    }

    /// Delete the local settings for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_settings(&mut self, owner_id: &str) -> Result<bool> {
        self.mutate(|tx, events| {
            let removed = tx.execute("DELETE FROM local_settings WHERE owner_id = ?1", [owner_id])?;
            if removed > 0 {
                events.push(Event::new(owner_id, EventType::SettingsDeleted));
            }
            Ok(removed > 0)
        })
    }

    /// Owner IDs with a local settings replica.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_owner_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT owner_id FROM local_settings ORDER BY owner_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Append an audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_event(&self, event: &Event) -> Result<()> {
        insert_event(&self.conn, event)?;
        Ok(())
    }

    /// Recent audit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_events(&self, subject: Option<&str>, limit: u32) -> Result<Vec<Event>> {
        get_events(&self.conn, subject, Some(limit)).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn test_settings_round_trip() {
        let mut store = LocalStore::open_memory().unwrap();
        let at = from_millis(1_700_000_000_000);

        store.put_settings("alice", &json!({"theme": "dark"}), at).unwrap();
        let local = store.get_settings("alice").unwrap().unwrap();

        assert_eq!(local.blob, json!({"theme": "dark"}));
        assert_eq!(local.last_accessed_at, at);
        assert!(store.get_settings("bob").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let mut store = LocalStore::open_memory().unwrap();
        let at = Utc::now();
        store.put_settings("alice", &json!(1), at).unwrap();
        store.put_settings("alice", &json!(2), at).unwrap();

        assert_eq!(store.get_settings("alice").unwrap().unwrap().blob, json!(2));
        assert_eq!(store.list_owner_ids().unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_baseline_and_publish() {
        let mut store = LocalStore::open_memory().unwrap();
        let t0 = from_millis(1_700_000_000_000);
        let t1 = t0 + ChronoDuration::seconds(10);
        store.put_settings("alice", &json!({}), t0).unwrap();

        assert!(store.set_baseline("alice", t1).unwrap());
        assert!(!store.set_baseline("nobody", t1).unwrap());
        assert_eq!(store.published_at("alice").unwrap(), None);

        store.mark_published("alice", t0).unwrap();
        assert_eq!(store.get_settings("alice").unwrap().unwrap().last_accessed_at, t0);
        assert!(store.published_at("alice").unwrap().is_some());
    }

    #[test]
    fn test_delete_records_event_once() {
        let mut store = LocalStore::open_memory().unwrap();
        store.put_settings("carol", &json!({}), Utc::now()).unwrap();

        assert!(store.delete_settings("carol").unwrap());
        assert!(!store.delete_settings("carol").unwrap());

        let events = store.recent_events(Some("carol"), 10).unwrap();
        let deletes = events
            .iter()
            .filter(|e| e.event_type == EventType::SettingsDeleted)
            .count();
        assert_eq!(deletes, 1);
    }
}
