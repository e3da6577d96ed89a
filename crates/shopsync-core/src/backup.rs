//! Rolling local backups.
//!
//! Every local write stores a wall-clock-stamped snapshot as "the current
//! backup" and appends it to a short history. Backups are a best-effort
//! export/undo trail; the merge engine never reads them.

use std::sync::Arc;

use crate::models::Snapshot;
use crate::snapshot::{build_snapshot, SnapshotSource};
use crate::storage::KeyValueStore;

const LATEST_KEY: &str = "shopsync.backup.latest";
const HISTORY_KEY: &str = "shopsync.backup.history";

/// Default number of snapshots kept in the history.
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Backup writer/reader over a key-value store
#[derive(Clone)]
pub struct BackupStore {
    kv: Arc<dyn KeyValueStore>,
    history_limit: usize,
}

impl BackupStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, history_limit: usize) -> Self {
        Self { kv, history_limit }
    }

    /// Snapshot `source`, store it as the latest backup and append it to the
    /// history, dropping the oldest entries beyond the limit.
    ///
    /// Persistence failures are logged and swallowed.
    pub fn update_backup(&self, source: &(impl SnapshotSource + ?Sized)) -> Snapshot {
        let snapshot = build_snapshot(source);

        let mut history = self.history();
        history.push(snapshot.clone());
        let overflow = history.len().saturating_sub(self.history_limit);
        history.drain(..overflow);

        if let Err(error) = self.write(LATEST_KEY, &snapshot) {
            tracing::warn!("Failed to store latest backup: {error}");
        }
        if let Err(error) = self.write(HISTORY_KEY, &history) {
            tracing::warn!("Failed to store backup history: {error}");
        }
        snapshot
    }

    /// Most recent backup
    pub fn latest(&self) -> Option<Snapshot> {
        self.read(LATEST_KEY)
    }

    /// Backup history, oldest first
    pub fn history(&self) -> Vec<Snapshot> {
        self.read(HISTORY_KEY).unwrap_or_default()
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.kv.get(key) {
            Ok(raw) => raw?,
            Err(error) => {
                tracing::warn!("Failed to read {key}: {error}");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|error| tracing::warn!("Ignoring unreadable {key}: {error}"))
            .ok()
    }

    fn write<T: serde::Serialize>(&self, key: &str, value: &T) -> crate::Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw)
    }
}

/// Render a snapshot as pretty-printed JSON for manual export.
pub fn render_backup_export(snapshot: &Snapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(timestamp_ms: i64) -> String {
    format!("shopsync-backup-{timestamp_ms}.json")
}
