//! shopsync-core - Core library for shopsync
//!
//! This crate contains the snapshot model, the last-writer-wins merge engine,
//! local persistence, backups and the sync orchestrator shared by every
//! shopsync host (CLI, embedded clients).

pub mod backup;
pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod sync;
pub mod timestamp;
pub mod util;

pub use error::{Error, Result};
pub use models::{Collection, CollectionValue, Collections, CustomerMap, Entity, Snapshot};
