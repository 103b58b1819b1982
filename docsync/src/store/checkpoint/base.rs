use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use docsync_config::shared::CollectionInfo;

use crate::error::SyncResult;
use crate::types::ResumeToken;

/// Fixed suffix of every checkpoint key.
pub const CHECKPOINT_KEY_SUFFIX: &str = "TOKEN_ID";

/// Identity of a checkpoint, `{sourceDb}_{sourceCollection}_TOKEN_ID`.
///
/// The key only depends on the source collection, two pairs reading the same source collection
/// share one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey(String);

impl CheckpointKey {
    pub fn for_source(source: &CollectionInfo) -> Self {
        Self(format!(
            "{}_{}_{CHECKPOINT_KEY_SUFFIX}",
            source.db_name, source.col_name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last change feed position applied for a source collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub key: CheckpointKey,
    pub token: ResumeToken,
    pub last_modified: DateTime<Utc>,
}

/// Durable storage of change feed positions.
///
/// Every collection supervisor reads and writes only its own key, implementations need no
/// cross-key coordination.
pub trait CheckpointStore {
    /// Returns the checkpoint stored under `key`, if any.
    fn get(
        &self,
        key: &CheckpointKey,
    ) -> impl Future<Output = SyncResult<Option<Checkpoint>>> + Send;

    /// Stores `token` under `key` and refreshes its modification time.
    ///
    /// Returns `true` if the write was acknowledged as applied.
    fn save(
        &self,
        key: &CheckpointKey,
        token: &ResumeToken,
    ) -> impl Future<Output = SyncResult<bool>> + Send;
}
