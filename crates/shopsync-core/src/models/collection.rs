//! Collection identifiers and typed collection values

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::{Collections, CustomerMap, Entity};
use crate::error::{Error, Result};

/// A watched local collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Settings,
    Products,
    Orders,
    Customers,
}

impl Collection {
    pub const ALL: [Self; 4] = [Self::Settings, Self::Products, Self::Orders, Self::Customers];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::Customers => "customers",
        }
    }

    /// Merge key field for keyed array collections
    #[must_use]
    pub const fn key_field(self) -> Option<&'static str> {
        match self {
            Self::Products => Some("id"),
            Self::Orders => Some("code"),
            Self::Settings | Self::Customers => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "settings" => Ok(Self::Settings),
            "products" => Ok(Self::Products),
            "orders" => Ok(Self::Orders),
            "customers" => Ok(Self::Customers),
            other => Err(Error::InvalidInput(format!("unknown collection '{other}'"))),
        }
    }
}

/// The value of one collection, as read from or written to the entity store
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionValue {
    Settings(Option<Entity>),
    Products(Vec<Entity>),
    Orders(Vec<Entity>),
    Customers(CustomerMap),
}

impl CollectionValue {
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Settings(_) => Collection::Settings,
            Self::Products(_) => Collection::Products,
            Self::Orders(_) => Collection::Orders,
            Self::Customers(_) => Collection::Customers,
        }
    }

    /// Read one collection out of a full state
    #[must_use]
    pub fn from_collections(collections: &Collections, collection: Collection) -> Self {
        match collection {
            Collection::Settings => Self::Settings(collections.settings.clone()),
            Collection::Products => Self::Products(collections.products.clone()),
            Collection::Orders => Self::Orders(collections.orders.clone()),
            Collection::Customers => Self::Customers(collections.customers.clone()),
        }
    }

    /// Replace the matching collection inside a full state
    pub fn write_into(self, collections: &mut Collections) {
        match self {
            Self::Settings(settings) => collections.settings = settings,
            Self::Products(products) => collections.products = products,
            Self::Orders(orders) => collections.orders = orders,
            Self::Customers(customers) => collections.customers = customers,
        }
    }

    /// Parse a user-supplied JSON document for `collection`.
    ///
    /// Unlike remote payloads, imports are strict: every element must be an
    /// object and array collections must be arrays.
    pub fn from_json(collection: Collection, value: Value) -> Result<Self> {
        match collection {
            Collection::Settings => match value {
                Value::Null => Ok(Self::Settings(None)),
                other => Entity::from_value(other)
                    .map(|settings| Self::Settings(Some(settings)))
                    .ok_or_else(|| {
                        Error::InvalidInput("settings must be a JSON object".to_string())
                    }),
            },
            Collection::Products => Ok(Self::Products(entity_list(collection, value)?)),
            Collection::Orders => Ok(Self::Orders(entity_list(collection, value)?)),
            Collection::Customers => {
                let Value::Object(entries) = value else {
                    return Err(Error::InvalidInput(
                        "customers must be a JSON object keyed by customer".to_string(),
                    ));
                };
                entries
                    .into_iter()
                    .map(|(key, value)| {
                        Entity::from_value(value).map(|entity| (key.clone(), entity)).ok_or_else(
                            || Error::InvalidInput(format!("customer '{key}' is not an object")),
                        )
                    })
                    .collect::<Result<CustomerMap>>()
                    .map(Self::Customers)
            }
        }
    }

    /// Stamp every held entity as modified at `stamp` (epoch millis).
    pub fn touch(&mut self, stamp: i64) {
        match self {
            Self::Settings(Some(settings)) => settings.touch(stamp),
            Self::Settings(None) => {}
            Self::Products(items) | Self::Orders(items) => {
                items.iter_mut().for_each(|item| item.touch(stamp));
            }
            Self::Customers(customers) => {
                customers.values_mut().for_each(|customer| customer.touch(stamp));
            }
        }
    }

    /// Number of entities held
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Settings(settings) => usize::from(settings.is_some()),
            Self::Products(items) | Self::Orders(items) => items.len(),
            Self::Customers(customers) => customers.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entity_list(collection: Collection, value: Value) -> Result<Vec<Entity>> {
    let Value::Array(items) = value else {
        return Err(Error::InvalidInput(format!(
            "{collection} must be a JSON array"
        )));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            Entity::from_value(item).ok_or_else(|| {
                Error::InvalidInput(format!("{collection}[{index}] is not an object"))
            })
        })
        .collect()
}
