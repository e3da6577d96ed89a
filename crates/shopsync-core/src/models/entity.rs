//! Entity model
//!
//! Entities are schemaless JSON records (settings, products, orders,
//! customers). The engine only interprets their key field and their
//! `createdAt` / `updatedAt` stamps; every other field is carried verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timestamp;

/// A single record of business state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(Map<String, Value>);

impl Entity {
    /// Create an empty entity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, returning `None` unless it is an object
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Get a raw field value
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Get a field as a string slice
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Merge key of this entity under `key_field`.
    ///
    /// Strings are used as-is, numbers are rendered to text, so `1` and `"1"`
    /// name the same record. Missing, null, empty and non-scalar values yield
    /// `None`: such entities cannot be merged.
    #[must_use]
    pub fn key(&self, key_field: &str) -> Option<String> {
        match self.0.get(key_field)? {
            Value::String(key) if !key.is_empty() => Some(key.clone()),
            Value::Number(key) => Some(key.to_string()),
            _ => None,
        }
    }

    /// Mark the record as modified at `stamp` (epoch millis).
    pub fn touch(&mut self, stamp: i64) {
        self.0.insert("updatedAt".to_string(), Value::from(stamp));
    }

    /// Effective modification time (see [`timestamp::item_stamp`])
    #[must_use]
    pub fn stamp(&self) -> i64 {
        timestamp::item_stamp(self)
    }

    /// Whether `field` holds a non-empty value (non-blank string or any non-null scalar)
    #[must_use]
    pub fn has_value(&self, field: &str) -> bool {
        match self.0.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(value)) => !value.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Borrow the underlying JSON object
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into the underlying JSON object
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Self::Object(entity.0)
    }
}

/// Per-device settings fields.
///
/// These configure where this client syncs and imports from. They are local
/// configuration rather than shared business data, so a merge never replaces
/// a non-empty local value with the remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    SyncEndpoint,
    SyncKey,
    ImportEndpoint,
    ImportCookie,
}

impl SettingsField {
    /// Every device-local settings field
    pub const DEVICE_LOCAL: [Self; 4] = [
        Self::SyncEndpoint,
        Self::SyncKey,
        Self::ImportEndpoint,
        Self::ImportCookie,
    ];

    /// JSON field name inside the settings entity
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncEndpoint => "syncEndpoint",
            Self::SyncKey => "syncKey",
            Self::ImportEndpoint => "importEndpoint",
            Self::ImportCookie => "importCookie",
        }
    }

    /// Whether the value is a credential that must be redacted in output
    #[must_use]
    pub const fn is_secret(self) -> bool {
        matches!(self, Self::SyncKey | Self::ImportCookie)
    }
}
