//! Configuration management.
//!
//! Settings come from `~/.docketsync/config.json` (camelCase JSON, every key
//! optional), overridden by environment variables and CLI flags.
//!
//! Resolution priority for paths:
//! 1. Explicit CLI flag
//! 2. Environment (`DOCKETSYNC_SHARED_ROOT`, `DOCKETSYNC_DB`)
//! 3. Config file
//! 4. Default (local db only; there is no default shared root)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::{SyncPolicy, DEFAULT_CACHE_FILE, DEFAULT_SETTINGS_DIR};

/// Environment variable naming the shared volume root.
pub const SHARED_ROOT_ENV: &str = "DOCKETSYNC_SHARED_ROOT";

/// Environment variable naming the local database path.
pub const DB_ENV: &str = "DOCKETSYNC_DB";

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Shared volume mount point.
    pub shared_root: Option<PathBuf>,
    /// Cache file name at the shared root.
    pub cache_file: String,
    /// Settings subdirectory at the shared root.
    pub settings_dir: String,
    /// Local database path.
    pub local_db: Option<PathBuf>,
    /// Directory of container files for `cache refresh`.
    pub source_dir: Option<PathBuf>,
    /// Refresh tunables.
    #[serde(flatten)]
    pub policy: SyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_root: None,
            cache_file: DEFAULT_CACHE_FILE.to_string(),
            settings_dir: DEFAULT_SETTINGS_DIR.to_string(),
            local_db: None,
            source_dir: None,
            policy: SyncPolicy::default(),
        }
    }
}

/// Get the global Docketsync directory (`~/.docketsync`).
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".docketsync"))
}

/// Path of the config file.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join("config.json"))
}

/// Load the config file, or defaults if it does not exist.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file exists but cannot be read or parsed.
pub fn load_config() -> Result<Config> {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Ok(Config::default()),
    }
}

/// Load a config file from an explicit path.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))?;

    if !(0.0..=1.0).contains(&config.policy.incomplete_threshold) {
        return Err(Error::Config(format!(
            "incompleteThreshold must be between 0 and 1, got {}",
            config.policy.incomplete_threshold
        )));
    }

    Ok(config)
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Resolve the shared volume root.
///
/// `None` means no shared volume is configured; the caller runs local-only.
#[must_use]
pub fn resolve_shared_root(explicit: Option<&Path>, config: &Config) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env_path(SHARED_ROOT_ENV))
        .or_else(|| config.shared_root.clone())
}

/// Resolve the local database path.
#[must_use]
pub fn resolve_db_path(explicit: Option<&Path>, config: &Config) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env_path(DB_ENV))
        .or_else(|| config.local_db.clone())
        .or_else(|| global_dir().map(|dir| dir.join("data").join("local.db")))
}
