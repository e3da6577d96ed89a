//! Entity timestamp resolution.
//!
//! Stamps arrive as epoch-millis numbers, numeric strings or date strings,
//! depending on which client wrote the record. Everything is coerced to epoch
//! milliseconds. Coercion never fails: anything unreadable is 0, which makes
//! the record the oldest candidate in a merge.
//!
//! Precedence: JSON number, then an all-digit string, then a date string.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::models::{Collections, Entity};

const UPDATED_AT: &str = "updatedAt";
const CREATED_AT: &str = "createdAt";

/// Date-time layouts without an offset, read as UTC.
const NAIVE_DATE_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Coerce a raw stamp value into epoch milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // u64 beyond i64 or a float; `as` saturates
pub fn to_timestamp(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .unwrap_or_else(|| number.as_f64().map_or(0, |float| float as i64)),
        Some(Value::String(raw)) => parse_timestamp_str(raw),
        _ => 0,
    }
}

/// Coerce a textual stamp into epoch milliseconds.
#[must_use]
pub fn parse_timestamp_str(raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    if raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return raw.parse().unwrap_or(0);
    }
    parse_date_time(raw).unwrap_or(0)
}

fn parse_date_time(raw: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    for format in NAIVE_DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|parsed| parsed.timestamp_millis())
}

/// Effective modification time of an entity: `max(updatedAt, createdAt)`.
#[must_use]
pub fn item_stamp(entity: &Entity) -> i64 {
    to_timestamp(entity.get(UPDATED_AT)).max(to_timestamp(entity.get(CREATED_AT)))
}

/// Effective modification time of a whole state: max over every entity.
///
/// Empty collections contribute 0.
#[must_use]
pub fn snapshot_stamp(collections: &Collections) -> i64 {
    let settings = collections.settings.as_ref().map_or(0, item_stamp);
    let products = max_stamp(collections.products.iter());
    let orders = max_stamp(collections.orders.iter());
    let customers = max_stamp(collections.customers.values());
    settings.max(products).max(orders).max(customers)
}

fn max_stamp<'a>(entities: impl Iterator<Item = &'a Entity>) -> i64 {
    entities.map(item_stamp).max().unwrap_or(0)
}

/// Render epoch milliseconds as an ISO-8601 UTC string (`...T..:..:..sssZ`).
#[must_use]
pub fn format_iso(stamp: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(stamp)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
