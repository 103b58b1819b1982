use docsync::error::ErrorKind;
use docsync::store::document::memory::MEMORY_URI_SCHEME;
use docsync::sync_error;
use docsync_config::shared::{CutoverBasis, PipelineConfig, SyncConfig};
use docsync_config::{ConfigSource, load_config};

use crate::error::{ReplicatorError, ReplicatorResult};

/// Everything the replicator needs to start, resolved from the configuration record and the
/// environment.
#[derive(Debug, Clone)]
pub struct ReplicatorSettings {
    /// The record as loaded, kept for the connection URIs.
    pub sync: SyncConfig,
    pub pipeline: PipelineConfig,
    pub origin: ConfigSource,
}

/// Loads and validates the replicator configuration.
///
/// The record comes from [`docsync_config::load_config`], the cutover basis from
/// `DOCSYNC_OPSTIME`. Any problem with either is a configuration error.
pub fn load_replicator_config() -> ReplicatorResult<ReplicatorSettings> {
    let (sync, origin) = load_config::<SyncConfig>().map_err(ReplicatorError::config)?;
    sync.validate().map_err(ReplicatorError::config)?;
    check_store_uris(&sync)?;

    let basis = CutoverBasis::from_env().map_err(ReplicatorError::config)?;
    let pipeline = sync
        .pipeline_config(basis)
        .map_err(ReplicatorError::config)?;

    Ok(ReplicatorSettings {
        sync,
        pipeline,
        origin,
    })
}

/// Rejects in-process stores, every `memory://` URI opens a separate empty store so the
/// replicator would never see the data it is meant to copy.
fn check_store_uris(sync: &SyncConfig) -> ReplicatorResult<()> {
    let uris = [
        ("token", &sync.token.uri),
        ("source", &sync.source.uri),
        ("destination", &sync.destination.uri),
    ];

    for (name, uri) in uris {
        if uri.trim_start().starts_with(MEMORY_URI_SCHEME) {
            return Err(ReplicatorError::config(sync_error!(
                ErrorKind::UnsupportedStoreUri,
                "In-memory stores cannot be used by the replicator",
                format!("`{name}.uri` must point to a document store server")
            )));
        }
    }

    Ok(())
}
