use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::{ErrorKind, SyncResult};
use crate::store::checkpoint::memory::MemoryCheckpointStore;
use crate::store::checkpoint::{Checkpoint, CheckpointKey, CheckpointStore};
use crate::sync_error;
use crate::test_utils::notify::TimedNotify;
use crate::types::ResumeToken;

#[derive(Debug, Default)]
struct Inner {
    save_calls: usize,
    failing_saves: usize,
    save_conditions: Vec<(usize, Arc<Notify>)>,
}

/// In-memory checkpoint store that can fail saves and notifies tests about them.
#[derive(Debug, Clone, Default)]
pub struct NotifyingCheckpointStore {
    checkpoints: MemoryCheckpointStore,
    inner: Arc<Mutex<Inner>>,
}

impl NotifyingCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` saves fail without storing anything.
    pub async fn fail_next_saves(&self, count: usize) {
        self.inner.lock().await.failing_saves += count;
    }

    /// Returns the number of finished save calls, failed ones included.
    pub async fn save_calls(&self) -> usize {
        self.inner.lock().await.save_calls
    }

    /// Returns a notification fired once `count` saves finished.
    pub async fn notify_on_saves(&self, count: usize) -> TimedNotify {
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().await;
        if inner.save_calls >= count {
            notify.notify_one();
        } else {
            inner.save_conditions.push((count, notify.clone()));
        }

        TimedNotify::new(notify)
    }

    /// Returns every stored checkpoint ordered by key.
    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.checkpoints().await
    }
}

impl CheckpointStore for NotifyingCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> SyncResult<Option<Checkpoint>> {
        self.checkpoints.get(key).await
    }

    async fn save(&self, key: &CheckpointKey, token: &ResumeToken) -> SyncResult<bool> {
        let fail = {
            let mut inner = self.inner.lock().await;
            if inner.failing_saves > 0 {
                inner.failing_saves -= 1;
                true
            } else {
                false
            }
        };

        let result = if fail {
            Err(sync_error!(
                ErrorKind::CheckpointWriteFailed,
                "Injected checkpoint save failure",
                key.to_string()
            ))
        } else {
            self.checkpoints.save(key, token).await
        };

        // Waiters only wake up once the save is visible through `get`.
        let mut inner = self.inner.lock().await;
        inner.save_calls += 1;

        let calls = inner.save_calls;
        inner.save_conditions.retain(|(expected, notify)| {
            let reached = calls >= *expected;
            if reached {
                notify.notify_one();
            }
            !reached
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use docsync_config::shared::CollectionInfo;
    use serde_json::json;

    use super::*;

    fn key() -> CheckpointKey {
        CheckpointKey::for_source(&CollectionInfo::new("shop", "orders"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_notification_fires_once_the_checkpoint_is_stored() {
        let store = NotifyingCheckpointStore::new();
        let saved = store.notify_on_saves(1).await;

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .save(&key(), &ResumeToken::new(json!({ "_data": "01" })))
                    .await
            })
        };

        saved.notified().await;

        let checkpoint = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(checkpoint.token.as_value(), &json!({ "_data": "01" }));
        assert!(writer.await.unwrap().unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_saves_are_counted_but_not_stored() {
        let store = NotifyingCheckpointStore::new();
        store.fail_next_saves(1).await;

        let err = store
            .save(&key(), &ResumeToken::new(json!({ "_data": "01" })))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CheckpointWriteFailed);
        assert_eq!(store.save_calls().await, 1);
        assert!(store.get(&key()).await.unwrap().is_none());
    }
}
