use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::workers::collection::CollectionWorkerState;

/// Identifies a collection supervisor by the position of its pair in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionWorkerId(pub usize);

impl fmt::Display for CollectionWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a running collection supervisor.
#[derive(Debug)]
pub struct CollectionWorkerHandle {
    state: CollectionWorkerState,
    abort_handle: AbortHandle,
}

impl CollectionWorkerHandle {
    pub fn state(&self) -> CollectionWorkerState {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}

#[derive(Debug)]
struct CollectionWorkerPoolInner {
    active: HashMap<CollectionWorkerId, CollectionWorkerHandle>,
    join_set: JoinSet<(CollectionWorkerId, SyncResult<()>)>,
}

/// Owns the tasks of every collection supervisor of a pipeline.
///
/// The lock is only taken in synchronous sections, so waiting for supervisors never blocks
/// spawning or inspecting them.
#[derive(Debug, Clone)]
pub struct CollectionWorkerPool {
    inner: Arc<Mutex<CollectionWorkerPoolInner>>,
}

impl CollectionWorkerPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CollectionWorkerPoolInner {
                active: HashMap::new(),
                join_set: JoinSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectionWorkerPoolInner> {
        // A panic while holding the lock leaves the map and set consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns a supervisor future into the pool.
    ///
    /// A second spawn for an id whose supervisor is still running is ignored.
    pub async fn spawn<F>(
        &self,
        worker_id: CollectionWorkerId,
        state: CollectionWorkerState,
        future: F,
    ) where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let mut inner = self.lock();

        if inner
            .active
            .get(&worker_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            warn!(%worker_id, "collection worker is already running");
            return;
        }

        let abort_handle = inner.join_set.spawn(async move {
            let result = future.await;
            (worker_id, result)
        });
        inner.active.insert(
            worker_id,
            CollectionWorkerHandle {
                state,
                abort_handle,
            },
        );

        debug!(%worker_id, "spawned collection worker in pool");
    }

    /// Returns the state of every supervisor that is still running, ordered by id.
    pub async fn active_states(&self) -> Vec<(CollectionWorkerId, CollectionWorkerState)> {
        let inner = self.lock();

        let mut states: Vec<_> = inner
            .active
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(worker_id, handle)| (*worker_id, handle.state()))
            .collect();
        states.sort_by_key(|(worker_id, _)| *worker_id);

        states
    }

    /// Waits for every supervisor to end and aggregates their errors.
    ///
    /// A supervisor that panicked is reported as [`ErrorKind::CollectionWorkerPanic`]. Supervisors
    /// spawned while waiting are waited for as well.
    pub async fn wait_all(&self) -> SyncResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = poll_fn(|cx| self.lock().join_set.poll_join_next(cx)).await;

            let Some(result) = result else {
                break;
            };

            match result {
                Ok((worker_id, worker_result)) => {
                    self.lock().active.remove(&worker_id);

                    if let Err(err) = worker_result {
                        error!(%worker_id, error = %err, "collection worker completed with error");
                        errors.push(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("collection worker task was cancelled");
                    } else {
                        errors.push(sync_error!(
                            ErrorKind::CollectionWorkerPanic,
                            "Collection worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        self.lock()
            .active
            .retain(|_, handle| !handle.is_finished());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for CollectionWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn panicking_worker() -> SyncResult<()> {
        panic!("collection worker failure")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_all_collects_errors_and_panics() {
        let pool = CollectionWorkerPool::new();

        pool.spawn(
            CollectionWorkerId(0),
            CollectionWorkerState::new(CollectionWorkerId(0)),
            async { Ok(()) },
        )
        .await;
        pool.spawn(
            CollectionWorkerId(1),
            CollectionWorkerState::new(CollectionWorkerId(1)),
            async { Err(sync_error!(ErrorKind::StoreQueryFailed, "Query failed")) },
        )
        .await;
        pool.spawn(
            CollectionWorkerId(2),
            CollectionWorkerState::new(CollectionWorkerId(2)),
            panicking_worker(),
        )
        .await;

        let err = pool.wait_all().await.unwrap_err();

        let mut kinds = err.kinds();
        kinds.sort_by_key(|kind| format!("{kind:?}"));
        assert_eq!(
            kinds,
            vec![ErrorKind::CollectionWorkerPanic, ErrorKind::StoreQueryFailed]
        );
        assert!(pool.active_states().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn running_workers_are_not_spawned_twice() {
        let pool = CollectionWorkerPool::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        pool.spawn(
            CollectionWorkerId(0),
            CollectionWorkerState::new(CollectionWorkerId(0)),
            async move {
                let _ = release_rx.await;
                Ok(())
            },
        )
        .await;
        pool.spawn(
            CollectionWorkerId(0),
            CollectionWorkerState::new(CollectionWorkerId(0)),
            async { Err(sync_error!(ErrorKind::Unknown, "Should not run")) },
        )
        .await;

        assert_eq!(pool.active_states().await.len(), 1);

        release_tx.send(()).unwrap();
        pool.wait_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pool_stays_usable_while_waiting() {
        let pool = CollectionWorkerPool::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        pool.spawn(
            CollectionWorkerId(0),
            CollectionWorkerState::new(CollectionWorkerId(0)),
            async move {
                let _ = release_rx.await;
                Ok(())
            },
        )
        .await;

        let waiter = tokio::spawn({
            let pool = pool.clone();
            async move { pool.wait_all().await }
        });
        tokio::task::yield_now().await;

        let states = tokio::time::timeout(Duration::from_secs(1), pool.active_states())
            .await
            .expect("active states blocked by wait_all");
        assert_eq!(states.len(), 1);

        tokio::time::timeout(
            Duration::from_secs(1),
            pool.spawn(
                CollectionWorkerId(1),
                CollectionWorkerState::new(CollectionWorkerId(1)),
                async { Err(sync_error!(ErrorKind::StoreQueryFailed, "Query failed")) },
            ),
        )
        .await
        .expect("spawn blocked by wait_all");

        release_tx.send(()).unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::StoreQueryFailed]);
        assert!(pool.active_states().await.is_empty());
    }
}
