//! Error types for shopsync-core

use thiserror::Error;

/// Result type alias using shopsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shopsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key-value persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),
}
