//! Docsync replicator service binary.
//!
//! Loads the configuration, connects the checkpoint, source and destination stores and runs
//! the replication pipeline until SIGTERM or Ctrl+C.

use crate::config::{ReplicatorSettings, load_replicator_config};
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

use docsync::error::SyncError;
use docsync_telemetry::tracing::init_tracing;
use tracing::error;

mod config;
mod core;
mod error;

/// Entry point for the replicator service.
///
/// Startup failures are printed as a report and end the process with a non-zero exit code.
fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> ReplicatorResult<()> {
    let settings = load_replicator_config()?;

    init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(settings))?;

    Ok(())
}

async fn async_main(settings: ReplicatorSettings) -> ReplicatorResult<()> {
    if let Err(err) = start_replicator_with_config(settings).await {
        error!("{err:#}");

        // Store and pipeline failures keep their kind.
        return Err(match err.downcast::<SyncError>() {
            Ok(sync_err) => ReplicatorError::from(sync_err),
            Err(err) => ReplicatorError::from(std::io::Error::other(err)),
        });
    }

    Ok(())
}
