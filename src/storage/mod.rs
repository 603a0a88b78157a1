//! SQLite storage for the device-local replica.
//!
//! - [`events`] - Sync audit trail
//! - [`schema`] - Database schema definitions
//! - [`migrations`] - Idempotent schema migrations
//! - [`sqlite`] - Local settings store

pub mod events;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use events::{Event, EventType, CACHE_SUBJECT};
pub use sqlite::LocalStore;
