//! Persistent store with an in-memory fallback

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::KeyValueStore;
use crate::error::Result;

/// Wraps a persistent store and degrades to memory on the first failure.
///
/// Once degraded, every write lands in an in-memory overlay (removals are
/// recorded as tombstones) and reads prefer the overlay, so the session keeps
/// a consistent view even though cross-session durability is lost.
pub struct FallbackStore<S> {
    primary: S,
    overlay: Mutex<HashMap<String, Option<String>>>,
    degraded: AtomicBool,
}

impl<S: KeyValueStore> FallbackStore<S> {
    pub fn new(primary: S) -> Self {
        Self {
            primary,
            overlay: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether persistence failed and values now live in memory only
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn overlay(&self) -> MutexGuard<'_, HashMap<String, Option<String>>> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn degrade(&self, operation: &str, error: &crate::Error) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "Persistent storage {operation} failed ({error}); keeping state in memory for this session"
            );
        }
    }
}

impl<S: KeyValueStore> KeyValueStore for FallbackStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.overlay().get(key) {
            return Ok(value.clone());
        }
        if self.is_degraded() {
            return Ok(self.primary.get(key).unwrap_or(None));
        }
        match self.primary.get(key) {
            Ok(value) => Ok(value),
            Err(error) => {
                self.degrade("read", &error);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if !self.is_degraded() {
            match self.primary.set(key, value) {
                Ok(()) => return Ok(()),
                Err(error) => self.degrade("write", &error),
            }
        }
        self.overlay()
            .insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !self.is_degraded() {
            match self.primary.remove(key) {
                Ok(()) => return Ok(()),
                Err(error) => self.degrade("remove", &error),
            }
        }
        self.overlay().insert(key.to_string(), None);
        Ok(())
    }
}
