use std::path::{Path, PathBuf};

use shopsync_core::backup::{render_backup_export, suggested_export_file_name};
use shopsync_core::util::unix_timestamp_millis;

use crate::cli::BackupCommands;
use crate::commands::common::summarize_collections;
use crate::context::AppContext;
use crate::error::CliError;

pub fn run_backup(command: BackupCommands, data_dir: &Path) -> Result<(), CliError> {
    let context = AppContext::open(data_dir)?;
    let backup = context.backup()?;

    match command {
        BackupCommands::Show => {
            let latest = backup.latest().ok_or(CliError::NoBackup)?;
            println!(
                "{}  {}",
                latest.meta.updated_at,
                summarize_collections(&latest.collections)
            );
        }
        BackupCommands::History => {
            let history = backup.history();
            if history.is_empty() {
                println!("No backups recorded.");
            }
            for snapshot in history.iter().rev() {
                println!(
                    "{}  {}",
                    snapshot.meta.updated_at,
                    summarize_collections(&snapshot.collections)
                );
            }
        }
        BackupCommands::Export { output } => {
            let latest = backup.latest().ok_or(CliError::NoBackup)?;
            let rendered = render_backup_export(&latest)?;
            if let Some(path) = output {
                let path = resolve_export_path(path, unix_timestamp_millis());
                std::fs::write(&path, rendered)?;
                println!("{}", path.display());
            } else {
                println!("{rendered}");
            }
        }
    }
    Ok(())
}

/// An existing directory receives a generated file name.
pub fn resolve_export_path(output: PathBuf, timestamp_ms: i64) -> PathBuf {
    if output.is_dir() {
        output.join(suggested_export_file_name(timestamp_ms))
    } else {
        output
    }
}
