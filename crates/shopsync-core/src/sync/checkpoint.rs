//! Persisted sync checkpoint

use std::sync::Arc;

use crate::storage::KeyValueStore;

const CHECKPOINT_KEY: &str = "shopsync.sync.checkpoint";

/// Last effective timestamp confirmed reconciled with the remote.
///
/// Only consulted at startup, to notice local writes that never made it out
/// (for example after a crash between a write and its push).
#[derive(Clone)]
pub struct SyncCheckpoint {
    kv: Arc<dyn KeyValueStore>,
}

impl SyncCheckpoint {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Stored checkpoint, 0 when missing or unreadable
    pub fn get(&self) -> i64 {
        match self.kv.get(CHECKPOINT_KEY) {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            Ok(None) => 0,
            Err(error) => {
                tracing::warn!("Failed to read sync checkpoint: {error}");
                0
            }
        }
    }

    /// Store a new checkpoint; failures are logged and swallowed
    pub fn set(&self, stamp: i64) {
        if let Err(error) = self.kv.set(CHECKPOINT_KEY, &stamp.to_string()) {
            tracing::warn!("Failed to store sync checkpoint {stamp}: {error}");
        }
    }
}
