//! shopsync CLI - keep a shop's local data in sync with a remote store
//!
//! Inspect local state, run sync cycles, watch in the background and manage
//! backups from the terminal.

mod cli;
mod commands;
mod context;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::backup::run_backup;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::import::run_import;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::context::resolve_data_dir;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "shopsync=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);

    match cli.command {
        Commands::Status { json } => run_status(json, &data_dir)?,
        Commands::Sync => run_sync(&data_dir).await?,
        Commands::Watch => run_watch(&data_dir).await?,
        Commands::Config { command } => run_config(command, &data_dir)?,
        Commands::Import { collection, file } => run_import(&collection, &file, &data_dir)?,
        Commands::Backup { command } => run_backup(command, &data_dir)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
