//! Local entity store.
//!
//! Holds the four watched collections in memory, persists every write through
//! a [`KeyValueStore`], snapshots a backup after each write and tells
//! registered observers about local mutations. Writes made by the sync engine
//! itself go through [`EntityStore::apply_without_triggering_sync`] so they do
//! not echo back as new local changes.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backup::BackupStore;
use crate::models::{Collection, CollectionValue, Collections, CustomerMap, Entity, Snapshot};
use crate::snapshot::SnapshotSource;
use crate::storage::KeyValueStore;

/// Receives a callback for every local mutation of a watched collection
pub trait MutationObserver: Send + Sync {
    fn on_local_mutation(&self, collection: Collection);
}

/// In-memory view of local business state backed by a key-value store
pub struct EntityStore {
    kv: Arc<dyn KeyValueStore>,
    state: RwLock<Collections>,
    backup: Option<BackupStore>,
    observers: Mutex<Vec<Weak<dyn MutationObserver>>>,
}

impl EntityStore {
    /// Load all collections from `kv`. Unreadable values start empty.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let state = Collections {
            settings: load::<Option<Entity>>(kv.as_ref(), Collection::Settings).flatten(),
            products: load(kv.as_ref(), Collection::Products).unwrap_or_default(),
            orders: load(kv.as_ref(), Collection::Orders).unwrap_or_default(),
            customers: load::<CustomerMap>(kv.as_ref(), Collection::Customers)
                .unwrap_or_default(),
        };
        Self {
            kv,
            state: RwLock::new(state),
            backup: None,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot a backup after every write
    #[must_use]
    pub fn with_backup(mut self, backup: BackupStore) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Backup store attached to this entity store, if any
    pub const fn backup(&self) -> Option<&BackupStore> {
        self.backup.as_ref()
    }

    /// Register a mutation observer. Dropped observers are pruned lazily.
    pub fn observe(&self, observer: Weak<dyn MutationObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Read one collection
    pub fn get(&self, collection: Collection) -> CollectionValue {
        CollectionValue::from_collections(&self.read(), collection)
    }

    pub fn settings(&self) -> Option<Entity> {
        self.read().settings.clone()
    }

    pub fn products(&self) -> Vec<Entity> {
        self.read().products.clone()
    }

    pub fn orders(&self) -> Vec<Entity> {
        self.read().orders.clone()
    }

    pub fn customers(&self) -> CustomerMap {
        self.read().customers.clone()
    }

    /// Replace one collection as a local mutation.
    ///
    /// The new value is visible to the next read immediately; persistence,
    /// backup and observer notification follow in that order.
    pub fn set(&self, value: CollectionValue) {
        let collection = value.collection();
        let snapshot = {
            let mut state = self.write();
            value.write_into(&mut state);
            state.clone()
        };
        self.persist(&snapshot, &[collection]);
        self.update_backup();
        self.notify(collection);
    }

    pub fn set_settings(&self, settings: Option<Entity>) {
        self.set(CollectionValue::Settings(settings));
    }

    pub fn set_products(&self, products: Vec<Entity>) {
        self.set(CollectionValue::Products(products));
    }

    pub fn set_orders(&self, orders: Vec<Entity>) {
        self.set(CollectionValue::Orders(orders));
    }

    pub fn set_customers(&self, customers: CustomerMap) {
        self.set(CollectionValue::Customers(customers));
    }

    /// Replace all four collections at once without notifying observers.
    pub fn apply_without_triggering_sync(&self, collections: Collections) {
        self.reconcile_without_triggering_sync(|_| Snapshot::stamped_by_content(collections));
    }

    /// Compute and install a new state from the current one in one step.
    ///
    /// `reconcile` runs under the write lock, so no local mutation can land
    /// between reading the current state and installing its replacement, and
    /// readers never see a partially applied state. Observers are not
    /// notified; the backup is still updated.
    pub fn reconcile_without_triggering_sync(
        &self,
        reconcile: impl FnOnce(&Collections) -> Snapshot,
    ) -> Snapshot {
        let snapshot = {
            let mut state = self.write();
            let snapshot = reconcile(&state);
            state.clone_from(&snapshot.collections);
            snapshot
        };
        self.persist(&snapshot.collections, &Collection::ALL);
        self.update_backup();
        snapshot
    }

    fn persist(&self, state: &Collections, collections: &[Collection]) {
        for &collection in collections {
            let result = match collection {
                Collection::Settings => save(self.kv.as_ref(), collection, &state.settings),
                Collection::Products => save(self.kv.as_ref(), collection, &state.products),
                Collection::Orders => save(self.kv.as_ref(), collection, &state.orders),
                Collection::Customers => save(self.kv.as_ref(), collection, &state.customers),
            };
            if let Err(error) = result {
                tracing::warn!("Failed to persist {collection}: {error}");
            }
        }
    }

    fn update_backup(&self) {
        if let Some(backup) = &self.backup {
            backup.update_backup(self);
        }
    }

    fn notify(&self, collection: Collection) {
        let observers: Vec<Arc<dyn MutationObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_local_mutation(collection);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotSource for EntityStore {
    fn collections(&self) -> Collections {
        self.read().clone()
    }
}

/// Storage key of a collection
pub fn storage_key(collection: Collection) -> String {
    format!("shopsync.{collection}")
}

fn load<T: DeserializeOwned>(kv: &dyn KeyValueStore, collection: Collection) -> Option<T> {
    let raw = match kv.get(&storage_key(collection)) {
        Ok(raw) => raw?,
        Err(error) => {
            tracing::warn!("Failed to read {collection}: {error}");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!("Ignoring unreadable {collection}: {error}");
            None
        }
    }
}

fn save<T: Serialize>(
    kv: &dyn KeyValueStore,
    collection: Collection,
    value: &T,
) -> crate::Result<()> {
    let raw = serde_json::to_string(value)?;
    kv.set(&storage_key(collection), &raw)
}
