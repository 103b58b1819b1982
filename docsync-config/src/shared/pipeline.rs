use std::time::Duration;

use crate::shared::{CollectionSyncSpec, CutoverConfig};

/// Default delay before a failed phase is attempted again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// Operations applied as upserts when no explicit list is configured.
pub const DEFAULT_UPSERT_OPERATIONS: [&str; 3] = ["insert", "update", "replace"];

/// Operations requested from the change feed when `source.stream` is empty.
pub const DEFAULT_STREAM_OPERATIONS: [&str; 4] = ["insert", "update", "replace", "delete"];

/// Runtime configuration of a replication pipeline.
///
/// Built from a validated [`crate::shared::SyncConfig`] and the cutover basis selected in the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Collection pairs to replicate, one supervisor each.
    pub collections: Vec<CollectionSyncSpec>,
    /// Operation names requested from the change feed.
    pub stream_operations: Vec<String>,
    /// Operation names applied to the destination as upserts.
    pub upsert_operations: Vec<String>,
    pub cutover: CutoverConfig,
    /// Delay before a failed phase is attempted again.
    pub retry_delay: Duration,
}

impl PipelineConfig {
    /// Creates a configuration with default operation lists, no cutover and the default delay.
    pub fn new(collections: Vec<CollectionSyncSpec>) -> Self {
        Self {
            collections,
            stream_operations: to_owned_list(&DEFAULT_STREAM_OPERATIONS),
            upsert_operations: to_owned_list(&DEFAULT_UPSERT_OPERATIONS),
            cutover: CutoverConfig::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_cutover(mut self, cutover: CutoverConfig) -> Self {
        self.cutover = cutover;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_stream_operations(mut self, operations: Vec<String>) -> Self {
        self.stream_operations = operations;
        self
    }
}

pub(crate) fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}
