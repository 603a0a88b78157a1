//! Local database migrations.
//!
//! Each migration runs once; applied versions are tracked in the
//! `schema_migrations` table, so this is safe to call on every open.

use rusqlite::{Connection, Result};
use tracing::{info, warn};

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_sync_events_subject_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_sync_events_subject
              ON sync_events(subject, created_at);",
    },
    Migration {
        version: "002_local_settings_published_at",
        sql: "ALTER TABLE local_settings ADD COLUMN published_at INTEGER;",
    },
];

/// Run all pending migrations on the database.
///
/// # Errors
///
/// Returns an error if a migration fails to apply. Duplicate-column errors
/// are logged and the migration is marked complete.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for migration in MIGRATIONS {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");

        if let Err(e) = conn.execute_batch(migration.sql) {
            if e.to_string().contains("duplicate column name") {
                warn!(
                    version = migration.version,
                    "Migration partially applied (columns exist), marking complete"
                );
            } else {
                return Err(e);
            }
        }

        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;

        info!(version = migration.version, "Migration complete");
    }

    Ok(())
}
