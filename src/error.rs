//! Error types for Docketsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=local db, 3=not_found, 4=validation, ...)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers
//!
//! Sync failures inside the replication layer never reach here as errors;
//! they degrade to a status. Only CLI-level problems (bad arguments, an
//! unusable local database, a broken config file) surface as [`Error`].

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Result type alias for Docketsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Local database (exit 2)
    DatabaseError,

    // Not Found (exit 3)
    SettingsNotFound,
    SourceNotFound,

    // Validation (exit 4)
    InvalidArgument,
    InvalidOwnerId,

    // Sync (exit 6)
    SyncError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::SettingsNotFound => "SETTINGS_NOT_FOUND",
            Self::SourceNotFound => "SOURCE_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidOwnerId => "INVALID_OWNER_ID",
            Self::SyncError => "SYNC_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError => 2,
            Self::SettingsNotFound | Self::SourceNotFound => 3,
            Self::InvalidArgument | Self::InvalidOwnerId => 4,
            Self::SyncError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether retrying with corrected input may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument | Self::InvalidOwnerId | Self::SyncError | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in Docketsync CLI operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No settings found for {owner_id}")]
    SettingsNotFound { owner_id: String },

    #[error("Docket source not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::SettingsNotFound { .. } => ErrorCode::SettingsNotFound,
            Self::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Sync(SyncError::InvalidOwnerId(_)) => ErrorCode::InvalidOwnerId,
            Self::Sync(_) => ErrorCode::SyncError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::SettingsNotFound { owner_id } => Some(format!(
                "No local or shared settings for '{owner_id}'. \
                 Use `docketsync settings list` to see known users."
            )),
            Self::SourceNotFound { path } => Some(format!(
                "Point --source at a directory of container JSON files (looked in {}).",
                path.display()
            )),
            Self::Sync(SyncError::InvalidOwnerId(_)) => Some(
                "Owner IDs cannot be empty or contain path separators or / \\ : * ? \" < > |"
                    .to_string(),
            ),
            Self::Sync(SyncError::StorageUnavailable(_)) => Some(
                "Check that the shared volume is mounted, or set DOCKETSYNC_SHARED_ROOT."
                    .to_string(),
            ),
            Self::Config(_) => {
                Some("Check ~/.docketsync/config.json for malformed JSON.".to_string())
            }
            Self::Database(_) => Some(
                "The local database may be locked by another docketsync process; retry."
                    .to_string(),
            ),
            Self::Io(_) | Self::Json(_) | Self::Sync(_) | Self::InvalidArgument(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
