//! Cache command implementations.

use std::path::PathBuf;

use colored::Colorize;

use crate::cli::commands::{runtime, Workspace};
use crate::cli::CacheCommands;
use crate::error::{Error, Result};
use crate::sync::status::{format_age, print_cache_report, print_refresh_outcome};
use crate::sync::SyncError;

/// Execute cache commands.
///
/// # Errors
///
/// Returns an error if the local database or config cannot be opened, the
/// refresh fails, or `verify` finds an unusable cache.
pub fn execute(command: &CacheCommands, workspace: &Workspace, json: bool) -> Result<()> {
    match command {
        CacheCommands::Show { limit } => show(workspace, *limit, json),
        CacheCommands::Verify => verify(workspace, json),
        CacheCommands::Refresh { force, source } => refresh(workspace, *force, source.as_ref(), json),
    }
}

fn show(workspace: &Workspace, limit: usize, json: bool) -> Result<()> {
    let rt = runtime()?;
    let record = rt.block_on(async {
        let (service, _task) = workspace.start(None)?;
        service.load_cache().await.map_err(Error::from)
    })?;

    if json {
        println!("{}", serde_json::to_string(&record)?);
        return Ok(());
    }

    let Some(record) = record else {
        println!("{}", "No usable cache.".dimmed());
        println!("{}", "Run 'docketsync cache verify' for details.".dimmed());
        return Ok(());
    };

    println!(
        "{} dockets, synced {}",
        record.dockets.len().to_string().bold(),
        format_age(record.last_sync, chrono::Utc::now())
    );
    println!();
    for docket in record.dockets.iter().take(limit) {
        let due = docket
            .due_date
            .map(|d| d.to_string())
            .unwrap_or_default();
        println!(
            "  {:<40} {:<20} {}",
            docket.full_name,
            docket.owner.as_deref().unwrap_or("-"),
            due.dimmed()
        );
    }
    if record.dockets.len() > limit {
        println!(
            "  {}",
            format!("... {} more (use --limit)", record.dockets.len() - limit).dimmed()
        );
    }
    Ok(())
}

fn verify(workspace: &Workspace, json: bool) -> Result<()> {
    let rt = runtime()?;
    let report = rt.block_on(async {
        let (service, _task) = workspace.start(None)?;
        service.inspect_cache().await.map_err(Error::from)
    })?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_cache_report(&report);
    }

    match report.status {
        Some(status) if !status.is_valid() => Err(SyncError::CorruptedCache(status).into()),
        _ => Ok(()),
    }
}

fn refresh(workspace: &Workspace, force: bool, source: Option<&PathBuf>, json: bool) -> Result<()> {
    let source_dir = workspace
        .source_dir(source.map(PathBuf::as_path))
        .ok_or_else(|| {
            Error::InvalidArgument("No docket source; pass --source or set sourceDir".to_string())
        })?;
    if !source_dir.is_dir() {
        return Err(Error::SourceNotFound { path: source_dir });
    }

    let rt = runtime()?;
    let outcome = rt.block_on(async {
        let (service, _task) = workspace.start(Some(source_dir))?;
        service.refresh_cache(force).await.map_err(Error::from)
    })?;

    if json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        print_refresh_outcome(&outcome);
    }
    Ok(())
}
