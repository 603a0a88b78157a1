//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Docketsync - shared-volume docket cache and settings replication
#[derive(Parser, Debug)]
#[command(name = "docketsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Shared volume root (default: sharedRoot from ~/.docketsync/config.json)
    #[arg(long, global = true, env = "DOCKETSYNC_SHARED_ROOT")]
    pub shared_root: Option<PathBuf>,

    /// Local database path (default: ~/.docketsync/data/local.db)
    #[arg(long, global = true, env = "DOCKETSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version information
    Version,

    /// Docket cache on the shared volume
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Per-user settings replication
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Show shared volume, cache and recent sync activity
    Status {
        /// Number of recent sync events to show
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Cache Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Print the validated cache
    Show {
        /// Maximum dockets to list
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Classify the cache and scan it for field issues
    Verify,

    /// Rebuild the cache from the docket source
    Refresh {
        /// Re-discover every upstream container
        #[arg(long)]
        force: bool,

        /// Directory of container JSON files (default: sourceDir from config)
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

// ============================================================================
// Settings Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print a user's settings
    Show {
        /// Owner (user) ID
        owner: String,
    },

    /// Replace a user's settings and publish them
    Set {
        /// Owner (user) ID
        owner: String,

        /// Settings as a JSON object, or @path to read one from a file
        value: String,
    },

    /// Reconcile local and shared settings
    Sync {
        /// Owner (user) ID
        owner: String,
    },

    /// List users with local or shared settings
    List,

    /// Delete a user's settings locally and on the shared volume
    Delete {
        /// Owner (user) ID
        owner: String,
    },
}
