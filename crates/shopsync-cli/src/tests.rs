use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap_complete::Shell;
use pretty_assertions::assert_eq;
use serde_json::json;
use shopsync_core::models::SettingsField;
use shopsync_core::sync::SyncOutcome;
use shopsync_core::util::unix_timestamp_millis;
use shopsync_core::{Collection, CollectionValue, Entity};
use tempfile::TempDir;

use crate::cli::{BackupCommands, Cli, Commands, ConfigCommands};
use crate::commands::backup::{resolve_export_path, run_backup};
use crate::commands::common::{format_stamp, mask_secret, settings_field_label};
use crate::commands::completions::render_completions;
use crate::commands::config::{run_config, set_settings_field};
use crate::commands::import::{parse_import, run_import};
use crate::commands::status::build_status;
use crate::commands::sync::{describe_outcome, run_sync};
use crate::context::{resolve_data_dir, AppContext};
use crate::error::CliError;

#[test]
fn resolve_data_dir_prefers_explicit_path() {
    let explicit = PathBuf::from("/tmp/shopsync-explicit");
    assert_eq!(resolve_data_dir(Some(explicit.clone())), explicit);
}

#[test]
fn cli_parses_nested_subcommands() {
    let cli = Cli::try_parse_from([
        "shopsync",
        "--data-dir",
        "/tmp/shop",
        "config",
        "set-endpoint",
        "https://sync.example.com",
    ])
    .unwrap();

    assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/shop")));
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommands::SetEndpoint { ref url }
        } if url == "https://sync.example.com"
    ));
}

#[test]
fn mask_secret_keeps_only_tail() {
    assert_eq!(mask_secret("abc"), "****");
    assert_eq!(mask_secret("secret-key-1234"), "****1234");
}

#[test]
fn format_stamp_labels_never_and_utc() {
    assert_eq!(format_stamp(0), "never");
    assert_eq!(format_stamp(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
}

#[test]
fn settings_field_label_masks_secrets() {
    let settings = Entity::from_value(json!({
        "syncEndpoint": "https://sync.example.com",
        "syncKey": "key-98765",
        "importCookie": "  "
    }))
    .unwrap();

    assert_eq!(
        settings_field_label(Some(&settings), SettingsField::SyncEndpoint),
        "https://sync.example.com"
    );
    assert_eq!(
        settings_field_label(Some(&settings), SettingsField::SyncKey),
        "****8765"
    );
    assert_eq!(
        settings_field_label(Some(&settings), SettingsField::ImportCookie),
        "(not set)"
    );
    assert_eq!(settings_field_label(None, SettingsField::ImportEndpoint), "(not set)");
}

#[test]
fn parse_import_rejects_wrong_shapes() {
    assert!(matches!(
        parse_import(Collection::Products, "{\"id\": \"P1\"}"),
        Err(CliError::InvalidImport(_))
    ));
    assert!(matches!(
        parse_import(Collection::Customers, "[1, 2]"),
        Err(CliError::InvalidImport(_))
    ));
    assert!(matches!(
        parse_import(Collection::Orders, "not json"),
        Err(CliError::InvalidImport(_))
    ));
}

#[test]
fn parse_import_accepts_collection_documents() {
    let value = parse_import(
        Collection::Orders,
        r#"[{"code": "DH-1", "updatedAt": 100}, {"code": "DH-2"}]"#,
    )
    .unwrap();
    assert_eq!(value.collection(), Collection::Orders);
    assert_eq!(value.len(), 2);

    let settings = parse_import(Collection::Settings, "null").unwrap();
    assert_eq!(settings, CollectionValue::Settings(None));
}

#[test]
fn run_import_persists_collection_across_sessions() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("products.json");
    std::fs::write(&file, r#"[{"id": "P1", "updatedAt": 5}, {"id": "P2"}]"#).unwrap();

    run_import("products", &file, dir.path()).unwrap();

    let reopened = AppContext::open(dir.path()).unwrap();
    let products = reopened.store.products();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].str_field("id"), Some("P1"));
    assert!(reopened.backup().unwrap().latest().is_some());
}

#[test]
fn run_import_rejects_unknown_collection() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("data.json");
    std::fs::write(&file, "[]").unwrap();

    let error = run_import("invoices", &file, dir.path()).unwrap_err();
    assert!(matches!(error, CliError::Core(_)));
}

#[test]
fn config_set_endpoint_normalizes_and_keeps_other_settings() {
    let dir = TempDir::new().unwrap();
    {
        let context = AppContext::open(dir.path()).unwrap();
        context.store.set_settings(Entity::from_value(json!({"shopName": "Corner"})));
    }

    run_config(
        ConfigCommands::SetEndpoint {
            url: " https://sync.example.com/state/ ".to_string(),
        },
        dir.path(),
    )
    .unwrap();

    let settings = AppContext::open(dir.path()).unwrap().store.settings().unwrap();
    assert_eq!(
        settings.str_field("syncEndpoint"),
        Some("https://sync.example.com/state")
    );
    assert_eq!(settings.str_field("shopName"), Some("Corner"));
}

#[test]
fn config_set_endpoint_rejects_non_http_urls() {
    let dir = TempDir::new().unwrap();
    let error = run_config(
        ConfigCommands::SetEndpoint {
            url: "sync.example.com".to_string(),
        },
        dir.path(),
    )
    .unwrap_err();
    assert!(matches!(error, CliError::Config(_)));
}

#[test]
fn config_set_key_with_blank_value_clears_key() {
    let dir = TempDir::new().unwrap();
    let context = AppContext::open(dir.path()).unwrap();
    set_settings_field(&context, SettingsField::SyncKey, Some("k1".to_string()));
    assert_eq!(
        context.store.settings().unwrap().str_field("syncKey"),
        Some("k1")
    );
    drop(context);

    run_config(
        ConfigCommands::SetKey {
            key: "   ".to_string(),
        },
        dir.path(),
    )
    .unwrap();

    let settings = AppContext::open(dir.path()).unwrap().store.settings().unwrap();
    assert_eq!(settings.str_field("syncKey"), None);
}

#[test]
fn status_reports_pending_push_when_local_is_ahead() {
    let dir = TempDir::new().unwrap();
    let context = AppContext::open(dir.path()).unwrap();
    context.store.set_settings(Entity::from_value(
        json!({"syncEndpoint": "https://sync.example.com"}),
    ));
    context.store.set_orders(vec![Entity::from_value(
        json!({"code": "DH-1", "updatedAt": 800}),
    )
    .unwrap()]);
    context.checkpoint().set(500);

    let report = build_status(&context);
    assert!(report.dirty);
    assert_eq!(report.local_stamp, 800);
    assert_eq!(report.checkpoint, 500);
    assert_eq!(report.orders, 1);
    assert_eq!(report.endpoint.as_deref(), Some("https://sync.example.com"));

    context.checkpoint().set(800);
    assert!(!build_status(&context).dirty);
}

#[test]
fn set_settings_field_stamps_settings() {
    let dir = TempDir::new().unwrap();
    let context = AppContext::open(dir.path()).unwrap();
    let before = unix_timestamp_millis();

    set_settings_field(&context, SettingsField::SyncKey, Some("k1".to_string()));

    assert!(context.store.settings().unwrap().stamp() >= before);
}

#[test]
fn import_after_sync_is_pending_for_the_next_session() {
    let dir = TempDir::new().unwrap();
    {
        let context = AppContext::open(dir.path()).unwrap();
        set_settings_field(
            &context,
            SettingsField::SyncEndpoint,
            Some("https://sync.example.com".to_string()),
        );
        let synced = build_status(&context).local_stamp;
        context.checkpoint().set(synced);
        assert!(!context.engine().unwrap().mark_dirty_if_ahead());
    }
    std::thread::sleep(Duration::from_millis(5));

    let file = dir.path().join("products.json");
    std::fs::write(&file, r#"[{"id": "P-imported", "updatedAt": 5}]"#).unwrap();
    run_import("products", &file, dir.path()).unwrap();

    let context = AppContext::open(dir.path()).unwrap();
    let products = context.store.products();
    assert!(products[0].stamp() > 5);
    assert!(build_status(&context).dirty);
    assert!(context.engine().unwrap().mark_dirty_if_ahead());
}

#[test]
fn status_is_clean_without_endpoint() {
    let dir = TempDir::new().unwrap();
    let context = AppContext::open(dir.path()).unwrap();
    context.store.set_products(vec![Entity::from_value(
        json!({"id": "P1", "updatedAt": 10}),
    )
    .unwrap()]);

    let report = build_status(&context);
    assert!(!report.dirty);
    assert_eq!(report.endpoint, None);
    assert!(!report.storage_degraded);
}

#[tokio::test(flavor = "current_thread")]
async fn run_sync_requires_sync_configuration() {
    let dir = TempDir::new().unwrap();
    let error = run_sync(dir.path()).await.unwrap_err();
    assert!(matches!(error, CliError::SyncNotConfigured));
}

#[test]
fn describe_outcome_maps_failures_to_errors() {
    assert!(matches!(
        describe_outcome(&SyncOutcome::NotConfigured),
        Err(CliError::SyncNotConfigured)
    ));
    assert!(matches!(
        describe_outcome(&SyncOutcome::PushFailed {
            stamp: 1,
            error: "HTTP 500".to_string()
        }),
        Err(CliError::PushFailed(message)) if message == "HTTP 500"
    ));

    let message = describe_outcome(&SyncOutcome::Completed {
        pushed: true,
        remote_present: false,
        stamp: 0,
    })
    .unwrap();
    assert!(message.contains("remote unavailable"));
    assert!(message.contains("pushed"));
}

#[test]
fn backup_export_writes_latest_snapshot() {
    let dir = TempDir::new().unwrap();
    {
        let context = AppContext::open(dir.path()).unwrap();
        context.store.set_products(vec![Entity::from_value(
            json!({"id": "P7", "name": "Tea"}),
        )
        .unwrap()]);
    }
    let output = dir.path().join("export.json");

    run_backup(
        BackupCommands::Export {
            output: Some(output.clone()),
        },
        dir.path(),
    )
    .unwrap();

    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
    assert_eq!(exported["products"][0]["id"], "P7");
    assert!(exported["meta"]["updatedAt"].is_string());
}

#[test]
fn backup_show_without_history_is_an_error() {
    let dir = TempDir::new().unwrap();
    let error = run_backup(BackupCommands::Show, dir.path()).unwrap_err();
    assert!(matches!(error, CliError::NoBackup));
}

#[test]
fn resolve_export_path_names_files_inside_directories() {
    let dir = TempDir::new().unwrap();
    assert_eq!(
        resolve_export_path(dir.path().to_path_buf(), 42),
        dir.path().join("shopsync-backup-42.json")
    );

    let file = dir.path().join("custom.json");
    assert_eq!(resolve_export_path(file.clone(), 42), file);
}

#[test]
fn bash_completions_mention_binary_name() {
    let script = String::from_utf8(render_completions(Shell::Bash)).unwrap();
    assert!(script.contains("shopsync"));
    assert!(script.contains("set-endpoint"));
}
