use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "shopsync")]
#[command(about = "Keep shop data in sync across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local data directory
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show local state and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync cycle now
    Sync,
    /// Keep syncing in the background until interrupted
    Watch,
    /// Configure this device's sync settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Replace a collection with the contents of a JSON file
    Import {
        /// Collection name (settings, products, orders, customers)
        collection: String,
        /// JSON file holding the new collection value
        file: PathBuf,
    },
    /// Inspect and export local backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the device-local settings (secrets masked)
    Show,
    /// Set the remote sync endpoint
    SetEndpoint {
        /// Endpoint URL (http:// or https://)
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Set the sync API key
    SetKey {
        /// API key sent as `x-api-key`; pass an empty string to clear it
        #[arg(value_name = "KEY")]
        key: String,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Print the latest backup summary
    Show,
    /// List backup history, newest first
    History,
    /// Export the latest backup as JSON
    Export {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}
