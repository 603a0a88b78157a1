//! Status command implementation.

use chrono::{TimeZone, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::cli::commands::{runtime, Workspace};
use crate::error::{Error, Result};
use crate::storage::Event;
use crate::sync::status::{format_age, print_cache_report};
use crate::sync::CacheReport;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    shared_root: Option<String>,
    db_path: String,
    cache: CacheReport,
    owners: Vec<String>,
    recent_events: Vec<Event>,
}

/// Execute status command.
///
/// # Errors
///
/// Returns an error if the local database cannot be opened or read.
pub fn execute(workspace: &Workspace, limit: u32, json: bool) -> Result<()> {
    let rt = runtime()?;
    let (cache, owners, recent_events) = rt.block_on(async {
        let (service, _task) = workspace.start(None)?;
        let cache = service.inspect_cache().await?;
        let owners = service.list_owner_ids().await?;
        let events = service.recent_events(None, limit).await?;
        Ok::<_, Error>((cache, owners, events))
    })?;

    let output = StatusOutput {
        shared_root: workspace
            .shared_root
            .as_ref()
            .map(|p| p.display().to_string()),
        db_path: workspace.db_path.display().to_string(),
        cache,
        owners,
        recent_events,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    match &output.shared_root {
        Some(root) => println!("{} {root}", "Shared root:".bold()),
        None => println!("{} {}", "Shared root:".bold(), "not configured".yellow()),
    }
    println!("{} {}", "Local db:".bold(), output.db_path);
    println!();

    print_cache_report(&output.cache);
    println!();

    println!("{} {}", "Users:".blue().bold(), output.owners.len());
    for owner in &output.owners {
        println!("  {owner}");
    }

    if !output.recent_events.is_empty() {
        println!();
        println!("{}", "Recent Activity:".blue().bold());
        let now = Utc::now();
        for event in &output.recent_events {
            let when = Utc
                .timestamp_millis_opt(event.created_at)
                .single()
                .map_or_else(String::new, |at| format_age(at, now));
            println!(
                "  {:<10} {:<12} {:<20} {:<12} {}",
                when.dimmed(),
                event.subject,
                event.event_type.as_str(),
                event.status.as_deref().unwrap_or(""),
                event.detail.as_deref().unwrap_or("").dimmed()
            );
        }
    }

    Ok(())
}
