use std::path::Path;

use serde_json::Value;
use shopsync_core::util::unix_timestamp_millis;
use shopsync_core::{Collection, CollectionValue};

use crate::context::AppContext;
use crate::error::CliError;

pub fn run_import(collection: &str, file: &Path, data_dir: &Path) -> Result<(), CliError> {
    let collection: Collection = collection.parse()?;
    let raw = std::fs::read_to_string(file)?;
    let mut value = parse_import(collection, &raw)?;
    let count = value.len();
    // Imported records count as modified now.
    value.touch(unix_timestamp_millis());

    let context = AppContext::open(data_dir)?;
    context.store.set(value);
    println!("Imported {count} {collection} entries from {}", file.display());
    Ok(())
}

pub fn parse_import(collection: Collection, raw: &str) -> Result<CollectionValue, CliError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|error| CliError::InvalidImport(format!("not valid JSON: {error}")))?;
    CollectionValue::from_json(collection, value)
        .map_err(|error| CliError::InvalidImport(error.to_string()))
}
