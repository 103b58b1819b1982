use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::SyncResult;
use crate::types::{ChangeEvent, Document, DocumentId, Namespace, OperationFilter, ResumeToken};

/// Message servers attach to resume positions that fell out of the change history.
pub const HISTORY_LOST_SIGNATURE: &str = "no longer be in the oplog";

/// Lazy, forward-only sequence of documents.
pub type RecordStream = BoxStream<'static, SyncResult<Document>>;

/// Unbounded, ordered sequence of change events.
pub type ChangeFeed = BoxStream<'static, SyncResult<ChangeEvent>>;

/// Where a change feed subscription starts.
#[derive(Debug, Clone, PartialEq)]
pub enum StartPosition {
    /// Strictly after the event that issued the token.
    After(ResumeToken),
    /// At or after the given time.
    At(DateTime<Utc>),
    /// With the first change committed after the subscription.
    Now,
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::After(token) => write!(f, "after token {token}"),
            Self::At(time) => write!(f, "at {}", time.to_rfc3339()),
            Self::Now => write!(f, "now"),
        }
    }
}

/// Capabilities of a document store.
///
/// Implementations perform a single remote operation per call and never retry, failures are
/// returned to the caller untouched. Handles are expected to be cheap to clone and safe to share
/// between collection supervisors.
pub trait Store {
    /// Inserts `document` and returns its identity.
    fn insert(
        &self,
        namespace: &Namespace,
        document: Document,
    ) -> impl Future<Output = SyncResult<DocumentId>> + Send;

    /// Inserts or replaces the document identified by `id`.
    ///
    /// Returns `true` if a document was matched, modified or created.
    fn upsert_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
        document: Document,
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Deletes the document identified by `id`, returns `true` if one was deleted.
    fn delete_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Returns the document identified by `id`, if any.
    fn find_by_id(
        &self,
        namespace: &Namespace,
        id: &DocumentId,
    ) -> impl Future<Output = SyncResult<Option<Document>>> + Send;

    /// Drops the collection with all its documents.
    fn drop_collection(&self, namespace: &Namespace) -> impl Future<Output = SyncResult<()>> + Send;

    /// Streams every document created before `cutover`.
    ///
    /// The stream follows the natural scan order of the store and cannot be restarted.
    fn find_before(
        &self,
        namespace: &Namespace,
        cutover: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<RecordStream>> + Send;

    /// Subscribes to the changes of `namespace` whose operation is in `filter`.
    fn subscribe_changes(
        &self,
        namespace: &Namespace,
        filter: &OperationFilter,
        start: StartPosition,
    ) -> impl Future<Output = SyncResult<ChangeFeed>> + Send;
}
