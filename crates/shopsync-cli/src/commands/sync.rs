use std::path::Path;

use shopsync_core::sync::{SyncOutcome, SyncTrigger};

use crate::commands::common::format_stamp;
use crate::context::AppContext;
use crate::error::CliError;

pub async fn run_sync(data_dir: &Path) -> Result<(), CliError> {
    let context = AppContext::open(data_dir)?;
    let engine = context.engine()?;
    engine.mark_dirty_if_ahead();

    let outcome = engine.perform_sync(SyncTrigger::Manual).await;
    println!("{}", describe_outcome(&outcome)?);
    Ok(())
}

/// One-line summary of a finished cycle; configuration and push failures are
/// reported as errors.
pub fn describe_outcome(outcome: &SyncOutcome) -> Result<String, CliError> {
    match outcome {
        SyncOutcome::NotConfigured => Err(CliError::SyncNotConfigured),
        SyncOutcome::PushFailed { error, .. } => Err(CliError::PushFailed(error.clone())),
        SyncOutcome::Coalesced => Ok("Sync already running; follow-up scheduled".to_string()),
        SyncOutcome::Completed {
            pushed,
            remote_present,
            stamp,
        } => {
            let source = if *remote_present {
                "merged with remote"
            } else {
                "remote unavailable, kept local state"
            };
            let action = if *pushed { "pushed" } else { "nothing to push" };
            Ok(format!(
                "Sync completed ({source}; {action}); data as of {}",
                format_stamp(*stamp)
            ))
        }
    }
}
