use std::path::Path;

use shopsync_core::models::SettingsField;
use shopsync_core::util::{normalize_endpoint, normalize_text_option, unix_timestamp_millis};
use shopsync_core::Entity;

use crate::cli::ConfigCommands;
use crate::commands::common::settings_field_label;
use crate::context::AppContext;
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, data_dir: &Path) -> Result<(), CliError> {
    let context = AppContext::open(data_dir)?;
    match command {
        ConfigCommands::Show => {
            let settings = context.store.settings();
            for field in SettingsField::DEVICE_LOCAL {
                println!(
                    "{:<15} {}",
                    field.as_str(),
                    settings_field_label(settings.as_ref(), field)
                );
            }
            Ok(())
        }
        ConfigCommands::SetEndpoint { url } => {
            let endpoint = normalize_endpoint(&url).map_err(CliError::Config)?;
            set_settings_field(&context, SettingsField::SyncEndpoint, Some(endpoint.clone()));
            println!("Sync endpoint set to {endpoint}");
            Ok(())
        }
        ConfigCommands::SetKey { key } => {
            let key = normalize_text_option(Some(key));
            let cleared = key.is_none();
            set_settings_field(&context, SettingsField::SyncKey, key);
            if cleared {
                println!("Sync key cleared");
            } else {
                println!("Sync key updated");
            }
            Ok(())
        }
    }
}

/// Write one device-local field into the settings entity, keeping every
/// other field, and stamp the entity as modified now. `None` clears the field.
pub fn set_settings_field(context: &AppContext, field: SettingsField, value: Option<String>) {
    let mut settings = context.store.settings().unwrap_or_else(Entity::new);
    match value {
        Some(value) => {
            settings.insert(field.as_str(), value);
        }
        None => {
            settings.remove(field.as_str());
        }
    }
    settings.touch(unix_timestamp_millis());
    context.store.set_settings(Some(settings));
}
