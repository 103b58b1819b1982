use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::store::document::{ChangeFeed, RecordStream, StartPosition, Store};
use crate::types::{
    ChangeEvent, Document, DocumentId, Namespace, OperationFilter, OperationType, ResumeToken,
    with_id,
};
use crate::{bail, sync_error};

/// URI scheme selecting the in-memory store.
pub const MEMORY_URI_SCHEME: &str = "memory://";

/// Number of history entries a store keeps before discarding the oldest ones.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100_000;

/// Field of the token envelope holding the position.
const TOKEN_DATA_FIELD: &str = "_data";

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    created_at: DateTime<Utc>,
}

/// One committed change kept in the store history.
#[derive(Debug, Clone)]
struct HistoryEntry {
    seq: u64,
    at: DateTime<Utc>,
    namespace: Namespace,
    operation: OperationType,
    document_id: Option<DocumentId>,
    full_document: Option<Document>,
}

impl HistoryEntry {
    fn to_event(&self) -> ChangeEvent {
        ChangeEvent {
            operation: self.operation.clone(),
            document_id: self.document_id.clone(),
            full_document: self.full_document.clone(),
            namespace: self.namespace.clone(),
            resume_token: encode_token(self.seq),
        }
    }
}

/// Last history position discarded by a rotation.
#[derive(Debug, Clone, Copy)]
struct RotationMark {
    seq: u64,
    latest_at: DateTime<Utc>,
}

/// Read position of one subscription.
#[derive(Debug)]
struct FeedCursor {
    namespace: Namespace,
    filter: OperationFilter,
    next_seq: u64,
    min_time: Option<DateTime<Utc>>,
}

impl FeedCursor {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        entry.namespace == self.namespace
            && self.filter.contains(&entry.operation)
            && self.min_time.is_none_or(|min_time| entry.at >= min_time)
    }
}

#[derive(Debug)]
struct Inner {
    collections: BTreeMap<Namespace, BTreeMap<String, StoredDocument>>,
    /// Retained change history ordered by sequence number, at most `history_capacity` entries.
    history: VecDeque<HistoryEntry>,
    history_capacity: usize,
    next_seq: u64,
    rotated: Option<RotationMark>,
}

impl Inner {
    fn new(history_capacity: usize) -> Self {
        Self {
            collections: BTreeMap::new(),
            history: VecDeque::new(),
            history_capacity: history_capacity.max(1),
            next_seq: 0,
            rotated: None,
        }
    }

    fn record(
        &mut self,
        namespace: &Namespace,
        operation: OperationType,
        document_id: Option<DocumentId>,
        full_document: Option<Document>,
        at: DateTime<Utc>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.history.push_back(HistoryEntry {
            seq,
            at,
            namespace: namespace.clone(),
            operation,
            document_id,
            full_document,
        });

        while self.history.len() > self.history_capacity {
            if let Some(oldest) = self.history.pop_front() {
                self.mark_rotated(oldest.seq, oldest.at);
            }
        }
    }

    /// Records that every entry up to `seq`, the newest of them at `latest_at`, left the history.
    fn mark_rotated(&mut self, seq: u64, latest_at: DateTime<Utc>) {
        let latest_at = self
            .rotated
            .map_or(latest_at, |mark| mark.latest_at.max(latest_at));

        self.rotated = Some(RotationMark { seq, latest_at });
    }

    fn insert(
        &mut self,
        namespace: &Namespace,
        document: Document,
        created_at: DateTime<Utc>,
    ) -> SyncResult<DocumentId> {
        let (id, document) = match DocumentId::from_document(&document) {
            Some(id) => (id, document),
            None => {
                let id = self.generate_id(created_at);
                let document = with_id(document, &id);
                (id, document)
            }
        };

        let collection = self.collections.entry(namespace.clone()).or_default();
        if collection.contains_key(&id.key()) {
            bail!(
                ErrorKind::StoreWriteFailed,
                "Duplicate document identity",
                format!("a document with id {id} already exists in {namespace}")
            );
        }

        collection.insert(
            id.key(),
            StoredDocument {
                document: document.clone(),
                created_at,
            },
        );
        self.record(
            namespace,
            OperationType::Insert,
            Some(id.clone()),
            Some(document),
            created_at,
        );

        Ok(id)
    }

    /// Builds an identity shaped like a store generated object id, prefixed by the creation
    /// time in seconds.
    fn generate_id(&self, created_at: DateTime<Utc>) -> DocumentId {
        let seconds = u32::try_from(created_at.timestamp()).unwrap_or(0);
        DocumentId::new(json!({ "$oid": format!("{seconds:08x}{:016x}", self.next_seq) }))
    }

    fn check_start(&self, namespace: &Namespace, start: &StartPosition) -> SyncResult<FeedCursor> {
        let (next_seq, min_time) = match start {
            StartPosition::After(token) => {
                let seq = decode_token(token)?;
                if seq >= self.next_seq {
                    bail!(
                        ErrorKind::InvalidResumeToken,
                        "Resume token was not issued by this store",
                        format!("token {token} is past the end of the history")
                    );
                }

                if let Some(mark) = self.rotated
                    && mark.seq > seq
                {
                    bail!(
                        ErrorKind::ChangeFeedHistoryLost,
                        "Resume position is no longer in the change history",
                        format!("token {token} was rotated out of the history of {namespace}")
                    );
                }

                (seq + 1, None)
            }
            StartPosition::At(time) => {
                if let Some(mark) = self.rotated
                    && mark.latest_at >= *time
                {
                    bail!(
                        ErrorKind::ChangeFeedHistoryLost,
                        "Resume position is no longer in the change history",
                        format!(
                            "changes of {namespace} at {} were rotated out of the history",
                            time.to_rfc3339()
                        )
                    );
                }

                let first_retained = self.rotated.map_or(0, |mark| mark.seq + 1);
                (first_retained, Some(*time))
            }
            StartPosition::Now => (self.next_seq, None),
        };

        Ok(FeedCursor {
            namespace: namespace.clone(),
            filter: OperationFilter::default(),
            next_seq,
            min_time,
        })
    }

    fn poll_feed(&self, cursor: &mut FeedCursor) -> Option<SyncResult<ChangeEvent>> {
        if let Some(mark) = self.rotated
            && mark.seq >= cursor.next_seq
        {
            return Some(Err(sync_error!(
                ErrorKind::ChangeFeedHistoryLost,
                "Resume position is no longer in the change history",
                format!(
                    "unread changes of {} were rotated out of the history",
                    cursor.namespace
                )
            )));
        }

        let next = self
            .history
            .iter()
            .find(|entry| entry.seq >= cursor.next_seq && cursor.matches(entry));

        match next {
            Some(entry) => {
                cursor.next_seq = entry.seq + 1;
                Some(Ok(entry.to_event()))
            }
            None => {
                cursor.next_seq = self.next_seq;
                None
            }
        }
    }
}

/// State carried between items of a memory change feed.
struct FeedState {
    inner: Arc<Mutex<Inner>>,
    cursor: FeedCursor,
    revision_rx: watch::Receiver<u64>,
    exhausted: bool,
}

/// In-process document store with a global change history.
///
/// Every mutation bumps a revision counter that change feeds and tests can wait on. The history
/// is capped like an operation log: once it holds more than its capacity the oldest entries are
/// discarded, and it can also be rotated explicitly. Either way older resume positions become
/// unusable.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    revision: Arc<watch::Sender<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a store retaining at most `capacity` history entries, at least one.
    pub fn with_history_capacity(capacity: usize) -> Self {
        let (revision, _) = watch::channel(0);

        Self {
            inner: Arc::new(Mutex::new(Inner::new(capacity))),
            revision: Arc::new(revision),
        }
    }

    /// Creates a store for a `memory://` URI.
    pub fn connect(uri: &str) -> SyncResult<Self> {
        if !uri.starts_with(MEMORY_URI_SCHEME) {
            bail!(
                ErrorKind::UnsupportedStoreUri,
                "Memory store URIs must use the memory:// scheme",
                uri.to_owned()
            );
        }

        Ok(Self::new())
    }

    /// Inserts a document as if it had been created at `created_at`.
    pub async fn insert_at(
        &self,
        namespace: &Namespace,
        document: Document,
        created_at: DateTime<Utc>,
    ) -> SyncResult<DocumentId> {
        let id = {
            let mut inner = self.inner.lock().await;
            inner.insert(namespace, document, created_at)?
        };
        self.bump_revision();

        Ok(id)
    }

    /// Appends an event that does not touch any document, for example `invalidate`.
    pub async fn emit_event(&self, namespace: &Namespace, operation: OperationType) {
        {
            let mut inner = self.inner.lock().await;
            inner.record(namespace, operation, None, None, Utc::now());
        }
        self.bump_revision();
    }

    /// Discards the whole retained history.
    ///
    /// Resuming after any token issued so far, or at any time not newer than the discarded
    /// changes, fails with [`ErrorKind::ChangeFeedHistoryLost`] afterwards.
    pub async fn rotate_history(&self) {
        {
            let mut inner = self.inner.lock().await;

            let last_seq = inner.history.back().map(|entry| entry.seq);
            let latest_at = inner.history.iter().map(|entry| entry.at).max();

            if let (Some(seq), Some(latest_at)) = (last_seq, latest_at) {
                inner.mark_rotated(seq, latest_at);
                inner.history.clear();
            }

            debug!(next_seq = inner.next_seq, "rotated memory store history");
        }
        self.bump_revision();
    }

    /// Returns the documents of `namespace` in scan order.
    pub async fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        let inner = self.inner.lock().await;

        inner
            .collections
            .get(namespace)
            .map(|collection| {
                collection
                    .values()
                    .map(|stored| stored.document.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of documents in `namespace`.
    pub async fn count(&self, namespace: &Namespace) -> usize {
        let inner = self.inner.lock().await;

        inner.collections.get(namespace).map_or(0, BTreeMap::len)
    }

    /// Subscribes to the revision counter, which changes after every mutation.
    pub fn revision_rx(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn insert(&self, namespace: &Namespace, document: Document) -> SyncResult<DocumentId> {
        self.insert_at(namespace, document, Utc::now()).await
    }

    async fn upsert_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
        document: Document,
    ) -> SyncResult<bool> {
        {
            let mut inner = self.inner.lock().await;
            let now = Utc::now();
            let document = with_id(document, id);

            let collection = inner.collections.entry(namespace.clone()).or_default();
            let operation = match collection.get_mut(&id.key()) {
                Some(stored) => {
                    stored.document = document.clone();
                    OperationType::Replace
                }
                None => {
                    collection.insert(
                        id.key(),
                        StoredDocument {
                            document: document.clone(),
                            created_at: now,
                        },
                    );
                    OperationType::Insert
                }
            };

            inner.record(namespace, operation, Some(id.clone()), Some(document), now);
        }
        self.bump_revision();

        Ok(true)
    }

    async fn delete_by_id(&self, namespace: &Namespace, id: &DocumentId) -> SyncResult<bool> {
        let deleted = {
            let mut inner = self.inner.lock().await;

            let removed = inner
                .collections
                .get_mut(namespace)
                .and_then(|collection| collection.remove(&id.key()))
                .is_some();
            if removed {
                inner.record(
                    namespace,
                    OperationType::Delete,
                    Some(id.clone()),
                    None,
                    Utc::now(),
                );
            }

            removed
        };

        if deleted {
            self.bump_revision();
        }

        Ok(deleted)
    }

    async fn find_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
    ) -> SyncResult<Option<Document>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .collections
            .get(namespace)
            .and_then(|collection| collection.get(&id.key()))
            .map(|stored| stored.document.clone()))
    }

    async fn drop_collection(&self, namespace: &Namespace) -> SyncResult<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.collections.remove(namespace).is_some() {
                inner.record(
                    namespace,
                    OperationType::Other("drop".to_owned()),
                    None,
                    None,
                    Utc::now(),
                );
            }
        }
        self.bump_revision();

        Ok(())
    }

    async fn find_before(
        &self,
        namespace: &Namespace,
        cutover: DateTime<Utc>,
    ) -> SyncResult<RecordStream> {
        let inner = self.inner.lock().await;

        let documents: Vec<SyncResult<Document>> = inner
            .collections
            .get(namespace)
            .map(|collection| {
                collection
                    .values()
                    .filter(|stored| stored.created_at < cutover)
                    .map(|stored| Ok(stored.document.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(futures::stream::iter(documents).boxed())
    }

    async fn subscribe_changes(
        &self,
        namespace: &Namespace,
        filter: &OperationFilter,
        start: StartPosition,
    ) -> SyncResult<ChangeFeed> {
        let mut cursor = {
            let inner = self.inner.lock().await;
            inner.check_start(namespace, &start)?
        };
        cursor.filter = filter.clone();

        debug!(%namespace, %start, "subscribed to memory change feed");

        let state = FeedState {
            inner: self.inner.clone(),
            cursor,
            revision_rx: self.revision.subscribe(),
            exhausted: false,
        };

        let feed = futures::stream::unfold(state, |mut state| async move {
            if state.exhausted {
                return None;
            }

            loop {
                state.revision_rx.borrow_and_update();

                let polled = {
                    let inner = state.inner.lock().await;
                    inner.poll_feed(&mut state.cursor)
                };

                match polled {
                    Some(Ok(event)) => return Some((Ok(event), state)),
                    Some(Err(err)) => {
                        state.exhausted = true;
                        return Some((Err(err), state));
                    }
                    None => {
                        if state.revision_rx.changed().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        });

        Ok(feed.boxed())
    }
}

fn encode_token(seq: u64) -> ResumeToken {
    ResumeToken::new(json!({ TOKEN_DATA_FIELD: format!("{seq:016X}") }))
}

fn decode_token(token: &ResumeToken) -> SyncResult<u64> {
    let data = token
        .as_value()
        .get(TOKEN_DATA_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            sync_error!(
                ErrorKind::InvalidResumeToken,
                "Resume token has no _data field",
                token.to_string()
            )
        })?;

    u64::from_str_radix(data, 16).map_err(|err| -> SyncError {
        sync_error!(
            ErrorKind::InvalidResumeToken,
            "Resume token is malformed",
            token.to_string(),
            source: err
        )
    })
}
