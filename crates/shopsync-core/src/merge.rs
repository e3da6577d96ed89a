//! Last-writer-wins merge engine.
//!
//! Whole records are compared by effective timestamp; the newer record wins
//! and ties go to the local side, so a local edit made in the same tick as a
//! remote pull survives. Because of that tie rule the merge is deterministic
//! but not commutative.

use std::collections::HashMap;

use crate::models::{Collections, CustomerMap, Entity, SettingsField, Snapshot};

/// Pick the newer of two optional records, preferring `local` on ties.
#[must_use]
pub fn pick_latest(local: Option<&Entity>, remote: Option<&Entity>) -> Option<Entity> {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            if remote.stamp() > local.stamp() {
                Some(remote.clone())
            } else {
                Some(local.clone())
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    }
}

/// Merge two record lists keyed by `key_field`.
///
/// Remote records seed the result, local records replace them when at least
/// as new. Records without a usable key are dropped. Output order follows
/// first insertion (remote first, then local-only additions) and carries no
/// meaning.
#[must_use]
pub fn merge_array_by_key(local: &[Entity], remote: &[Entity], key_field: &str) -> Vec<Entity> {
    let mut merged = KeyedMerge::default();
    for entity in remote {
        if let Some(key) = entity.key(key_field) {
            merged.seed(key, entity);
        }
    }
    for entity in local {
        if let Some(key) = entity.key(key_field) {
            merged.overlay(key, entity);
        }
    }
    merged.into_values()
}

/// Merge two customer maps with the same rules as [`merge_array_by_key`].
#[must_use]
pub fn merge_customers(local: &CustomerMap, remote: &CustomerMap) -> CustomerMap {
    let mut merged = KeyedMerge::default();
    for (key, entity) in remote.iter().filter(|(key, _)| !key.is_empty()) {
        merged.seed(key.clone(), entity);
    }
    for (key, entity) in local.iter().filter(|(key, _)| !key.is_empty()) {
        merged.overlay(key.clone(), entity);
    }
    merged.into_entries().collect()
}

/// Merge a local and a remote snapshot into a new snapshot.
///
/// Settings follow last-writer-wins, except the device-local fields
/// ([`SettingsField::DEVICE_LOCAL`]) which keep any non-empty local value.
/// The result is stamped with its own effective timestamp.
#[must_use]
pub fn merge_snapshots(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    let local = &local.collections;
    let remote = &remote.collections;

    let collections = Collections {
        settings: merge_settings(local.settings.as_ref(), remote.settings.as_ref()),
        products: merge_array_by_key(&local.products, &remote.products, "id"),
        orders: merge_array_by_key(&local.orders, &remote.orders, "code"),
        customers: merge_customers(&local.customers, &remote.customers),
    };
    Snapshot::stamped_by_content(collections)
}

fn merge_settings(local: Option<&Entity>, remote: Option<&Entity>) -> Option<Entity> {
    let mut merged = pick_latest(local, remote)?;
    if let Some(local) = local {
        for field in SettingsField::DEVICE_LOCAL {
            let name = field.as_str();
            if local.has_value(name) {
                if let Some(value) = local.get(name) {
                    merged.insert(name, value.clone());
                }
            }
        }
    }
    Some(merged)
}

/// Insertion-ordered keyed accumulator.
#[derive(Default)]
struct KeyedMerge {
    index: HashMap<String, usize>,
    entries: Vec<(String, Entity)>,
}

impl KeyedMerge {
    fn seed(&mut self, key: String, entity: &Entity) {
        match self.index.get(&key) {
            Some(&position) => self.entries[position].1 = entity.clone(),
            None => self.push(key, entity),
        }
    }

    fn overlay(&mut self, key: String, entity: &Entity) {
        match self.index.get(&key) {
            Some(&position) => {
                let existing = &mut self.entries[position].1;
                if entity.stamp() >= existing.stamp() {
                    *existing = entity.clone();
                }
            }
            None => self.push(key, entity),
        }
    }

    fn push(&mut self, key: String, entity: &Entity) {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, entity.clone()));
    }

    fn into_values(self) -> Vec<Entity> {
        self.into_entries().map(|(_, entity)| entity).collect()
    }

    fn into_entries(self) -> impl Iterator<Item = (String, Entity)> {
        self.entries.into_iter()
    }
}
