use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shopsync_core::Error),
    #[error(transparent)]
    Transport(#[from] shopsync_core::sync::TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid import: {0}")]
    InvalidImport(String),
    #[error("No backup recorded yet")]
    NoBackup,
    #[error("Sync push failed: {0}")]
    PushFailed(String),
    #[error("Sync is not configured. Run `shopsync config set-endpoint <URL>` first.")]
    SyncNotConfigured,
}
