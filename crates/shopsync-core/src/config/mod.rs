//! Engine configuration.
//!
//! Timing and retention knobs for the sync orchestrator and backups, stored
//! as `config.json` in the data directory. Every field has a default, so a
//! missing file or a partial file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backup::DEFAULT_HISTORY_LIMIT;
use crate::error::{Error, Result};

/// File name of the engine configuration inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub sync: SyncConfig,
    pub backup: BackupConfig,
}

/// Sync orchestrator timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Quiet period after the last local mutation before syncing
    pub debounce_ms: u64,
    /// Interval of silent background polls
    pub poll_interval_secs: u64,
    /// Delay of a coalesced follow-up cycle after a successful cycle
    pub retry_after_success_ms: u64,
    /// Delay of a coalesced follow-up cycle after a failed push
    pub retry_after_failure_ms: u64,
    /// Run one silent cycle shortly after the engine starts
    pub sync_on_start: bool,
    /// Request timeout for the remote endpoint; transport default when unset
    pub http_timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_200,
            poll_interval_secs: 45,
            retry_after_success_ms: 2_000,
            retry_after_failure_ms: 3_000,
            sync_on_start: true,
            http_timeout_secs: None,
        }
    }
}

impl SyncConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Poll period, never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub const fn retry_after_success(&self) -> Duration {
        Duration::from_millis(self.retry_after_success_ms)
    }

    pub const fn retry_after_failure(&self) -> Duration {
        Duration::from_millis(self.retry_after_failure_ms)
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }
}

/// Backup retention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    pub history_limit: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Load configuration; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("Failed to read config at {}: {}", path.display(), error))
        })?;
        Self::parse(&raw)
            .map_err(|error| Error::Config(format!("{} ({})", error, path.display())))
    }

    /// Parse configuration from a raw JSON payload.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(raw).map_err(|error| format!("invalid config JSON: {error}"))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}
