//! Key-value persistence primitive.
//!
//! Local state, backups and the sync checkpoint are stored as JSON strings
//! under string keys. The contract is "durable enough for the session":
//! [`FallbackStore`] keeps working in memory when the disk gives out.

mod fallback;
mod file;
mod memory;

pub use fallback::FallbackStore;
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;

/// Minimal string key-value store
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key was never written or was removed
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}
