//! Settings command implementations.

use colored::Colorize;
use serde_json::Value;

use crate::cli::commands::{runtime, Workspace};
use crate::cli::SettingsCommands;
use crate::error::{Error, Result};
use crate::sync::status::print_settings_report;

/// Execute settings commands.
///
/// # Errors
///
/// Returns an error for invalid owner IDs or values, a failing local
/// database, or missing settings on `show`.
pub fn execute(command: &SettingsCommands, workspace: &Workspace, json: bool) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let (service, _task) = workspace.start(None)?;

        match command {
            SettingsCommands::Show { owner } => {
                let blob = service
                    .load_settings(owner)
                    .await?
                    .ok_or_else(|| Error::SettingsNotFound {
                        owner_id: owner.clone(),
                    })?;
                if json {
                    println!("{}", serde_json::to_string(&blob)?);
                } else {
                    println!("{}", serde_json::to_string_pretty(&blob)?);
                }
            }
            SettingsCommands::Set { owner, value } => {
                let blob = parse_blob(value)?;
                let report = service.save_settings(owner, blob).await?;
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    print_settings_report(&report);
                }
            }
            SettingsCommands::Sync { owner } => {
                let report = service.resolve_and_sync(owner).await?;
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    print_settings_report(&report);
                }
            }
            SettingsCommands::List => {
                let owners = service.list_owner_ids().await?;
                if json {
                    println!("{}", serde_json::to_string(&owners)?);
                } else if owners.is_empty() {
                    println!("{}", "No settings found.".dimmed());
                } else {
                    for owner in owners {
                        println!("{owner}");
                    }
                }
            }
            SettingsCommands::Delete { owner } => {
                let removed = service.delete_settings(owner).await?;
                if json {
                    let output = serde_json::json!({ "owner_id": owner, "removed": removed });
                    println!("{output}");
                } else if removed {
                    println!("{} Deleted settings for {owner}", "✓".green());
                } else {
                    println!("{}", format!("No settings for {owner}").dimmed());
                }
            }
        }
        Ok::<(), Error>(())
    })
}

/// Parse a settings value: inline JSON, or `@path` to a JSON file.
///
/// Settings are always a JSON object.
fn parse_blob(value: &str) -> Result<Value> {
    let text = match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidArgument(format!("Cannot read {path}: {e}")))?,
        None => value.to_string(),
    };

    let blob: Value = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidArgument(format!("Settings must be valid JSON: {e}")))?;
    if !blob.is_object() {
        return Err(Error::InvalidArgument(
            "Settings must be a JSON object".to_string(),
        ));
    }
    Ok(blob)
}
