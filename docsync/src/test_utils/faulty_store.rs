use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::error::{SyncError, SyncResult};
use crate::store::document::{ChangeFeed, RecordStream, StartPosition, Store};
use crate::test_utils::notify::TimedNotify;
use crate::types::{Document, DocumentId, Namespace, OperationFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreMethod {
    Insert,
    UpsertById,
    DeleteById,
    FindById,
    DropCollection,
    FindBefore,
    SubscribeChanges,
}

/// A change feed subscription observed by a [`FaultyStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub namespace: Namespace,
    pub start: StartPosition,
}

#[derive(Debug, Default)]
struct Inner {
    faults: HashMap<StoreMethod, VecDeque<SyncError>>,
    subscriptions: Vec<Subscription>,
    subscription_conditions: Vec<(usize, Arc<Notify>)>,
}

impl Inner {
    fn take_fault(&mut self, method: StoreMethod) -> Option<SyncError> {
        self.faults.get_mut(&method)?.pop_front()
    }

    fn record_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);

        let count = self.subscriptions.len();
        self.subscription_conditions.retain(|(expected, notify)| {
            let reached = count >= *expected;
            if reached {
                notify.notify_one();
            }
            !reached
        });
    }
}

/// [`Store`] wrapper that fails calls on demand and records change feed subscriptions.
#[derive(Debug, Clone)]
pub struct FaultyStore<S> {
    store: S,
    inner: Arc<Mutex<Inner>>,
}

impl<S> FaultyStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Makes the next call of `method` fail with `err`, queued behind earlier faults.
    pub async fn fail_next(&self, method: StoreMethod, err: SyncError) {
        let mut inner = self.inner.lock().await;
        inner.faults.entry(method).or_default().push_back(err);
    }

    /// Returns every subscription attempted so far, including failed ones.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.lock().await.subscriptions.clone()
    }

    /// Returns a notification fired once `count` subscriptions were attempted.
    pub async fn notify_on_subscriptions(&self, count: usize) -> TimedNotify {
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().await;
        if inner.subscriptions.len() >= count {
            notify.notify_one();
        } else {
            inner.subscription_conditions.push((count, notify.clone()));
        }

        TimedNotify::new(notify)
    }

    async fn take_fault(&self, method: StoreMethod) -> Option<SyncError> {
        self.inner.lock().await.take_fault(method)
    }
}

impl<S> Store for FaultyStore<S>
where
    S: Store + Sync,
{
    async fn insert(&self, namespace: &Namespace, document: Document) -> SyncResult<DocumentId> {
        if let Some(err) = self.take_fault(StoreMethod::Insert).await {
            return Err(err);
        }

        self.store.insert(namespace, document).await
    }

    async fn upsert_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
        document: Document,
    ) -> SyncResult<bool> {
        if let Some(err) = self.take_fault(StoreMethod::UpsertById).await {
            return Err(err);
        }

        self.store.upsert_by_id(namespace, id, document).await
    }

    async fn delete_by_id(&self, namespace: &Namespace, id: &DocumentId) -> SyncResult<bool> {
        if let Some(err) = self.take_fault(StoreMethod::DeleteById).await {
            return Err(err);
        }

        self.store.delete_by_id(namespace, id).await
    }

    async fn find_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
    ) -> SyncResult<Option<Document>> {
        if let Some(err) = self.take_fault(StoreMethod::FindById).await {
            return Err(err);
        }

        self.store.find_by_id(namespace, id).await
    }

    async fn drop_collection(&self, namespace: &Namespace) -> SyncResult<()> {
        if let Some(err) = self.take_fault(StoreMethod::DropCollection).await {
            return Err(err);
        }

        self.store.drop_collection(namespace).await
    }

    async fn find_before(
        &self,
        namespace: &Namespace,
        cutover: DateTime<Utc>,
    ) -> SyncResult<RecordStream> {
        if let Some(err) = self.take_fault(StoreMethod::FindBefore).await {
            return Err(err);
        }

        self.store.find_before(namespace, cutover).await
    }

    async fn subscribe_changes(
        &self,
        namespace: &Namespace,
        filter: &OperationFilter,
        start: StartPosition,
    ) -> SyncResult<ChangeFeed> {
        let fault = {
            let mut inner = self.inner.lock().await;
            inner.record_subscription(Subscription {
                namespace: namespace.clone(),
                start: start.clone(),
            });
            inner.take_fault(StoreMethod::SubscribeChanges)
        };

        if let Some(err) = fault {
            return Err(err);
        }

        self.store.subscribe_changes(namespace, filter, start).await
    }
}
