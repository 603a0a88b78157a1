//! Sync status display.
//!
//! Human-readable rendering of cache reports and settings sync results.
//! JSON output bypasses this module entirely.

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};

use crate::sync::engine::{CacheReport, SettingsSyncReport};
use crate::sync::types::{IntegrityStatus, RefreshOutcome, SyncEvent, SyncStatus};

/// Color a settings status for terminal output.
#[must_use]
pub fn colored_status(status: &SyncStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        SyncStatus::Synced => text.green(),
        SyncStatus::LocalOnly | SyncStatus::Conflict(_) => text.yellow(),
        SyncStatus::SyncFailed(_) => text.red(),
        SyncStatus::Unknown | SyncStatus::Syncing => text.dimmed(),
    }
}

fn colored_integrity(status: &IntegrityStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        IntegrityStatus::Valid => text.green(),
        IntegrityStatus::MissingIntegrity => text.yellow(),
        _ => text.red(),
    }
}

/// Render how long ago a timestamp was.
#[must_use]
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - at;
    if age.num_seconds() < 0 {
        "in the future".to_string()
    } else if age.num_minutes() < 1 {
        "just now".to_string()
    } else if age.num_hours() < 1 {
        format!("{}m ago", age.num_minutes())
    } else if age.num_days() < 1 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}d ago", age.num_days())
    }
}

fn print_date(label: &str, at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
    match at {
        Some(at) => println!("  {label:<15} {} ({})", at.format("%Y-%m-%d %H:%M"), format_age(at, now)),
        None => println!("  {label:<15} {}", "never".dimmed()),
    }
}

/// Print a cache report.
pub fn print_cache_report(report: &CacheReport) {
    let now = Utc::now();
    println!("{}", "Docket Cache".bold().underline());
    println!();

    if !report.reachable {
        println!("{}", "Shared volume unreachable; running local-only.".yellow());
        return;
    }
    if !report.present {
        println!("{}", "No cache on the shared volume yet.".dimmed());
        println!("{}", "Run 'docketsync cache refresh' to build one.".dimmed());
        return;
    }

    if let Some(status) = &report.status {
        println!("  {:<15} {}", "Integrity:", colored_integrity(status));
    }
    println!("  {:<15} {}", "Dockets:", report.docket_count);

    print_date("Last sync:", report.last_sync, now);
    if let Some(meta) = &report.integrity {
        if let Some(peak) = meta.peak_item_count {
            println!("  {:<15} {peak}", "Peak count:");
        }
        print_date("Full sync:", meta.last_full_sync_at, now);
        print_date("Discovery:", meta.last_discovery_at, now);
        if let Some(ids) = &meta.discovered_source_ids {
            println!("  {:<15} {}", "Containers:", ids.len());
        }
    }

    if report.needs_discovery {
        println!("  {}", "Discovery due on next refresh".yellow());
    } else if report.needs_full_sync {
        println!("  {}", "Full sync due on next refresh".yellow());
    }

    if !report.field_issues.is_empty() {
        println!();
        println!(
            "{} {}",
            "Field issues:".yellow().bold(),
            report.field_issues.len()
        );
        for issue in report.field_issues.iter().take(10) {
            println!("  #{:<5} {:<30} {:?}", issue.index, issue.full_name, issue.kind);
        }
        if report.field_issues.len() > 10 {
            println!("  {}", format!("... {} more", report.field_issues.len() - 10).dimmed());
        }
    }
}

/// Print the result of a refresh.
pub fn print_refresh_outcome(outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::Written { count, plan } => {
            println!("{} Wrote {count} dockets ({plan} sync)", "✓".green());
        }
        RefreshOutcome::KeptPrevious { found, peak } => {
            println!(
                "{} Fetched {found} dockets against a peak of {peak}; kept the previous cache",
                "!".yellow()
            );
        }
        RefreshOutcome::AlreadyRunning => {
            println!("{}", "A refresh is already running.".dimmed());
        }
        RefreshOutcome::Unavailable => {
            println!("{}", "Shared volume unreachable; cache not refreshed.".yellow());
        }
    }
}

/// Print a settings sync report.
pub fn print_settings_report(report: &SettingsSyncReport) {
    println!("{} {}", report.owner_id.bold(), colored_status(&report.status));
    for event in &report.events {
        if let SyncEvent::Conflict {
            resolution,
            delta_ms,
            ..
        } = event
        {
            println!(
                "  {} resolved as {resolution:?} (shared - local = {delta_ms} ms)",
                "conflict".yellow()
            );
        }
    }
}
