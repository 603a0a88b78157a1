//! Data models for Docketsync.
//!
//! - [`DocketRecord`] - a production job entry
//! - [`SettingsReplica`] / [`LocalSettings`] - per-user settings copies

pub mod docket;
pub mod settings;

pub use docket::{derive_full_name, DocketRecord};
pub use settings::{is_valid_owner_id, LocalSettings, SettingsReplica};
