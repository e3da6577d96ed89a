//! Snapshot builders.
//!
//! Two builders exist and they are not interchangeable: backups record when
//! they were taken, sync snapshots record when their content last changed.

use chrono::{SecondsFormat, Utc};

use crate::models::{Collections, Snapshot};

/// Read access to the current local state
pub trait SnapshotSource {
    /// Clone out all four collections as one consistent state
    fn collections(&self) -> Collections;
}

impl SnapshotSource for Collections {
    fn collections(&self) -> Collections {
        self.clone()
    }
}

/// Build a full snapshot stamped with the current wall-clock time.
pub fn build_snapshot(source: &(impl SnapshotSource + ?Sized)) -> Snapshot {
    let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    Snapshot::new(source.collections(), updated_at)
}

/// Build a snapshot stamped with the effective timestamp of its content.
pub fn build_sync_snapshot(source: &(impl SnapshotSource + ?Sized)) -> Snapshot {
    Snapshot::stamped_by_content(source.collections())
}
