//! Remote synchronization: checkpoint, transport and the orchestrator.

mod checkpoint;
mod engine;
mod transport;

pub use checkpoint::SyncCheckpoint;
pub use engine::{SyncEngine, SyncListener, SyncOutcome, SyncPhase, SyncStatus, SyncTrigger};
pub use transport::{
    parse_remote_payload, HttpSyncTransport, SyncTarget, SyncTransport, TransportError,
    TransportResult, API_KEY_HEADER,
};
