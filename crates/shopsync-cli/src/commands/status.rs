use std::path::Path;

use serde::Serialize;
use shopsync_core::snapshot::{build_sync_snapshot, SnapshotSource};
use shopsync_core::sync::SyncTarget;

use crate::commands::common::{format_stamp, summarize_collections};
use crate::context::AppContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub data_dir: String,
    pub endpoint: Option<String>,
    pub local_stamp: i64,
    pub checkpoint: i64,
    pub dirty: bool,
    pub products: usize,
    pub orders: usize,
    pub customers: usize,
    pub storage_degraded: bool,
}

pub fn build_status(context: &AppContext) -> StatusReport {
    let local = build_sync_snapshot(context.store.as_ref());
    let target = SyncTarget::from_settings(local.collections.settings.as_ref());
    let checkpoint = context.checkpoint().get();
    let local_stamp = local.stamp();

    StatusReport {
        data_dir: context.data_dir.display().to_string(),
        dirty: target.is_some() && local_stamp > checkpoint,
        endpoint: target.map(|target| target.endpoint),
        local_stamp,
        checkpoint,
        products: local.collections.products.len(),
        orders: local.collections.orders.len(),
        customers: local.collections.customers.len(),
        storage_degraded: context.storage_degraded(),
    }
}

pub fn run_status(as_json: bool, data_dir: &Path) -> Result<(), CliError> {
    let context = AppContext::open(data_dir)?;
    let report = build_status(&context);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Data directory: {}", report.data_dir);
    println!(
        "Sync endpoint:  {}",
        report.endpoint.as_deref().unwrap_or("(not configured)")
    );
    println!("Local data:     {}", format_stamp(report.local_stamp));
    println!("Last synced:    {}", format_stamp(report.checkpoint));
    println!(
        "Pending push:   {}",
        if report.dirty { "yes" } else { "no" }
    );
    println!(
        "Contents:       {}",
        summarize_collections(&context.store.collections())
    );
    if report.storage_degraded {
        println!("Warning: local storage is unavailable; changes are kept in memory only");
    }
    Ok(())
}
