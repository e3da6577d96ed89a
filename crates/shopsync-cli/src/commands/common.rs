use chrono::{TimeZone, Utc};
use shopsync_core::models::{Collections, SettingsField};
use shopsync_core::Entity;

/// Human-readable UTC label for a millisecond stamp; `never` for zero.
pub fn format_stamp(stamp: i64) -> String {
    if stamp <= 0 {
        return "never".to_string();
    }
    Utc.timestamp_millis_opt(stamp).single().map_or_else(
        || stamp.to_string(),
        |value| value.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Mask a credential, keeping only its last four characters.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

/// Display value for a settings field, secrets masked.
pub fn settings_field_label(settings: Option<&Entity>, field: SettingsField) -> String {
    let value = settings
        .and_then(|settings| settings.str_field(field.as_str()))
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match value {
        None => "(not set)".to_string(),
        Some(value) if field.is_secret() => mask_secret(value),
        Some(value) => value.to_string(),
    }
}

/// One-line collection counts, e.g. `3 products, 1 order, 0 customers`.
pub fn summarize_collections(collections: &Collections) -> String {
    format!(
        "{}, {}, {}",
        plural(collections.products.len(), "product"),
        plural(collections.orders.len(), "order"),
        plural(collections.customers.len(), "customer"),
    )
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
