use std::path::Path;

use shopsync_core::sync::SyncTarget;

use crate::context::AppContext;
use crate::error::CliError;

pub async fn run_watch(data_dir: &Path) -> Result<(), CliError> {
    let context = AppContext::open(data_dir)?;
    let Some(target) = SyncTarget::from_settings(context.store.settings().as_ref()) else {
        return Err(CliError::SyncNotConfigured);
    };

    let engine = context.engine()?;
    engine.register_listener(|| tracing::info!("Local state updated from sync"));
    engine.start();
    println!(
        "Watching {} every {}s (Ctrl-C to stop)",
        target.endpoint,
        context.config.sync.poll_interval().as_secs()
    );

    tokio::signal::ctrl_c().await?;
    engine.shutdown();

    let status = engine.status();
    if status.dirty {
        println!("Stopped with local changes still pending");
    } else {
        println!("Stopped");
    }
    Ok(())
}
