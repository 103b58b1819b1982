use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::store::checkpoint::{Checkpoint, CheckpointKey, CheckpointStore};
use crate::types::ResumeToken;

/// Checkpoint store keeping positions in memory.
///
/// Positions are lost when the process exits, every restart begins without checkpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<Mutex<BTreeMap<CheckpointKey, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored checkpoint.
    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.lock().await.values().cloned().collect()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> SyncResult<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &CheckpointKey, token: &ResumeToken) -> SyncResult<bool> {
        let checkpoint = Checkpoint {
            key: key.clone(),
            token: token.clone(),
            last_modified: Utc::now(),
        };
        self.checkpoints.lock().await.insert(key.clone(), checkpoint);

        Ok(true)
    }
}
