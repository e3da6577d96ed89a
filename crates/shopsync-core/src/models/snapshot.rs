//! Snapshot model

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::Entity;
use crate::timestamp::{format_iso, snapshot_stamp};

/// Customer records keyed by customer key
pub type CustomerMap = BTreeMap<String, Entity>;

/// The four synchronizable collections of local business state.
///
/// Remote payloads are read leniently: a `null` or missing collection is
/// empty, and non-object entries are dropped instead of failing the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collections {
    #[serde(default, deserialize_with = "deserialize_settings")]
    pub settings: Option<Entity>,
    #[serde(default, deserialize_with = "deserialize_entities")]
    pub products: Vec<Entity>,
    #[serde(default, deserialize_with = "deserialize_entities")]
    pub orders: Vec<Entity>,
    #[serde(default, deserialize_with = "deserialize_customers")]
    pub customers: CustomerMap,
}

impl Collections {
    /// Whether any collection holds data
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.settings.is_some()
            || !self.products.is_empty()
            || !self.orders.is_empty()
            || !self.customers.is_empty()
    }
}

/// Snapshot metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// ISO-8601 stamp; wall clock for backups, derived content stamp for sync
    #[serde(default)]
    pub updated_at: String,
}

/// Full point-in-time aggregate of all synchronizable local state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub meta: SnapshotMeta,
    #[serde(flatten)]
    pub collections: Collections,
}

impl Snapshot {
    /// Wrap collections with an explicit `meta.updatedAt`
    #[must_use]
    pub fn new(collections: Collections, updated_at: impl Into<String>) -> Self {
        Self {
            meta: SnapshotMeta {
                updated_at: updated_at.into(),
            },
            collections,
        }
    }

    /// Wrap collections stamped with their derived effective timestamp
    #[must_use]
    pub fn stamped_by_content(collections: Collections) -> Self {
        let updated_at = format_iso(snapshot_stamp(&collections));
        Self::new(collections, updated_at)
    }

    /// Effective timestamp of the contained entities
    #[must_use]
    pub fn stamp(&self) -> i64 {
        snapshot_stamp(&self.collections)
    }

    /// Whether any collection holds data
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.collections.has_data()
    }
}

fn deserialize_settings<'de, D>(deserializer: D) -> Result<Option<Entity>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(Entity::from_value))
}

fn deserialize_entities<'de, D>(deserializer: D) -> Result<Vec<Entity>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items.into_iter().filter_map(Entity::from_value).collect())
}

fn deserialize_customers<'de, D>(deserializer: D) -> Result<CustomerMap, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(entries)) = value else {
        return Ok(CustomerMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| Entity::from_value(value).map(|entity| (key, entity)))
        .collect())
}
