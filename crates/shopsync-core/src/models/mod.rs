//! Data models for shopsync

mod collection;
mod entity;
mod snapshot;

pub use collection::{Collection, CollectionValue};
pub use entity::{Entity, SettingsField};
pub use snapshot::{Collections, CustomerMap, Snapshot, SnapshotMeta};
