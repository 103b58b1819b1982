use futures::StreamExt;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::{
    DOCSYNC_CHECKPOINT_FAILURES_TOTAL, DOCSYNC_EVENTS_APPLIED_TOTAL, OPERATION_LABEL, SOURCE_LABEL,
};
use crate::store::checkpoint::{CheckpointKey, CheckpointStore};
use crate::store::document::{ChangeFeed, Store};
use crate::types::{ChangeEvent, DocumentId, Namespace, OperationFilter, OperationType};
use crate::{bail, sync_error};

/// What applying one event did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Upserted,
    Deleted,
    /// An upsert-class event arrived without a full document.
    SkippedMissingDocument,
    /// The operation does not mutate the destination.
    Ignored,
}

/// How a consumption run ended.
#[derive(Debug)]
pub struct ConsumeReport {
    /// Events fully processed, checkpoint save included, before the run ended.
    pub processed: u64,
    /// `Ok` only when the run was interrupted by shutdown.
    pub result: SyncResult<()>,
}

/// Applies change events of one source collection to its destination collection.
#[derive(Debug)]
pub struct ChangeFeedConsumer<'a, D, C> {
    source: Namespace,
    destination_namespace: Namespace,
    checkpoint_key: CheckpointKey,
    upserts: &'a OperationFilter,
    destination: &'a D,
    checkpoints: &'a C,
}

impl<'a, D, C> ChangeFeedConsumer<'a, D, C>
where
    D: Store,
    C: CheckpointStore,
{
    pub fn new(
        source: Namespace,
        destination_namespace: Namespace,
        checkpoint_key: CheckpointKey,
        upserts: &'a OperationFilter,
        destination: &'a D,
        checkpoints: &'a C,
    ) -> Self {
        Self {
            source,
            destination_namespace,
            checkpoint_key,
            upserts,
            destination,
            checkpoints,
        }
    }

    /// Consumes `feed` until it fails, ends or shutdown is requested.
    ///
    /// Events are applied strictly in delivery order and the checkpoint is saved after each one.
    /// A feed that ends without an error is reported as [`ErrorKind::ChangeFeedClosed`].
    pub async fn consume(
        &self,
        mut feed: ChangeFeed,
        shutdown_rx: &mut ShutdownRx,
    ) -> ConsumeReport {
        let mut processed = 0;

        loop {
            let next = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(
                        source = %self.source,
                        processed,
                        "shutdown requested, closing change feed"
                    );

                    return ConsumeReport { processed, result: Ok(()) };
                }

                next = feed.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(err)) => return ConsumeReport { processed, result: Err(err) },
                None => {
                    let err = sync_error!(
                        ErrorKind::ChangeFeedClosed,
                        "Change feed ended",
                        self.source.to_string()
                    );

                    return ConsumeReport { processed, result: Err(err) };
                }
            };

            if let Err(err) = self.apply(&event).await {
                return ConsumeReport { processed, result: Err(err) };
            }

            self.checkpoint(&event).await;
            processed += 1;
        }
    }

    /// Applies a single event to the destination.
    pub async fn apply(&self, event: &ChangeEvent) -> SyncResult<ApplyAction> {
        let action = match &event.operation {
            OperationType::Delete => {
                let Some(id) = &event.document_id else {
                    bail!(
                        ErrorKind::MissingDocumentId,
                        "Delete event has no document key",
                        self.source.to_string()
                    );
                };

                if !self
                    .destination
                    .delete_by_id(&self.destination_namespace, id)
                    .await?
                {
                    bail!(
                        ErrorKind::WriteNotApplied,
                        "Delete was not applied",
                        format!("{} _id {id}", self.destination_namespace)
                    );
                }

                ApplyAction::Deleted
            }
            operation if self.upserts.contains(operation) => {
                let Some(document) = event.full_document.clone() else {
                    warn!(
                        source = %self.source,
                        %operation,
                        id = ?event.document_id,
                        "change event has no full document, skipping"
                    );

                    return Ok(ApplyAction::SkippedMissingDocument);
                };

                let Some(id) = event
                    .document_id
                    .clone()
                    .or_else(|| DocumentId::from_document(&document))
                else {
                    bail!(
                        ErrorKind::MissingDocumentId,
                        "Change event has no document key",
                        self.source.to_string()
                    );
                };

                if !self
                    .destination
                    .upsert_by_id(&self.destination_namespace, &id, document)
                    .await?
                {
                    bail!(
                        ErrorKind::WriteNotApplied,
                        "Upsert was not applied",
                        format!("{} _id {id}", self.destination_namespace)
                    );
                }

                ApplyAction::Upserted
            }
            operation => {
                debug!(source = %self.source, %operation, "ignoring change event");

                ApplyAction::Ignored
            }
        };

        counter!(
            DOCSYNC_EVENTS_APPLIED_TOTAL,
            SOURCE_LABEL => self.source.to_string(),
            OPERATION_LABEL => event.operation.as_str().to_owned()
        )
        .increment(1);

        Ok(action)
    }

    async fn checkpoint(&self, event: &ChangeEvent) {
        let failure = match self
            .checkpoints
            .save(&self.checkpoint_key, &event.resume_token)
            .await
        {
            Ok(true) => return,
            Ok(false) => "checkpoint save was not acknowledged".to_owned(),
            Err(err) => err.to_string(),
        };

        warn!(
            key = %self.checkpoint_key,
            token = %event.resume_token,
            error = %failure,
            "failed to save checkpoint, continuing"
        );
        counter!(DOCSYNC_CHECKPOINT_FAILURES_TOTAL, SOURCE_LABEL => self.source.to_string())
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use docsync_config::shared::CollectionInfo;
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::store::checkpoint::memory::MemoryCheckpointStore;
    use crate::store::document::memory::MemoryStore;
    use crate::types::{Document, ResumeToken};

    fn source() -> Namespace {
        Namespace::new("shop", "orders")
    }

    fn destination_namespace() -> Namespace {
        Namespace::new("archive", "orders")
    }

    fn key() -> CheckpointKey {
        CheckpointKey::for_source(&CollectionInfo::new("shop", "orders"))
    }

    fn document(id: i64, status: &str) -> Document {
        json!({ "_id": id, "status": status }).as_object().cloned().unwrap()
    }

    fn event(
        operation: OperationType,
        id: i64,
        full_document: Option<Document>,
        seq: u64,
    ) -> ChangeEvent {
        ChangeEvent {
            operation,
            document_id: Some(DocumentId::new(id)),
            full_document,
            namespace: source(),
            resume_token: ResumeToken::new(json!({ "_data": format!("{seq:016X}") })),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applies_events_and_checkpoints_each_one() {
        let destination = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::upserts();
        let consumer = ChangeFeedConsumer::new(
            source(),
            destination_namespace(),
            key(),
            &upserts,
            &destination,
            &checkpoints,
        );

        let events = vec![
            Ok(event(OperationType::Insert, 1, Some(document(1, "new")), 1)),
            Ok(event(OperationType::Insert, 2, Some(document(2, "new")), 2)),
            Ok(event(OperationType::Update, 1, Some(document(1, "paid")), 3)),
            Ok(event(OperationType::Delete, 2, None, 4)),
        ];
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let report = consumer
            .consume(stream::iter(events).boxed(), &mut shutdown_rx)
            .await;

        assert_eq!(report.processed, 4);
        assert_eq!(report.result.unwrap_err().kind(), ErrorKind::ChangeFeedClosed);

        let documents = destination.documents(&destination_namespace()).await;
        assert_eq!(documents, vec![document(1, "paid")]);

        let saved = checkpoints.checkpoints().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].token.as_value(), &json!({ "_data": format!("{:016X}", 4) }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applying_an_event_twice_matches_applying_it_once() {
        let once = MemoryStore::new();
        let twice = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::upserts();

        let events = [
            event(OperationType::Insert, 1, Some(document(1, "new")), 1),
            event(OperationType::Update, 1, Some(document(1, "paid")), 2),
            event(OperationType::Replace, 2, Some(document(2, "shipped")), 3),
        ];

        for (destination, repeat) in [(&once, 1), (&twice, 2)] {
            let consumer = ChangeFeedConsumer::new(
                source(),
                destination_namespace(),
                key(),
                &upserts,
                destination,
                &checkpoints,
            );

            for event in &events {
                for _ in 0..repeat {
                    assert_eq!(consumer.apply(event).await.unwrap(), ApplyAction::Upserted);
                }
            }
        }

        let expected = vec![document(1, "paid"), document(2, "shipped")];
        assert_eq!(once.documents(&destination_namespace()).await, expected);
        assert_eq!(twice.documents(&destination_namespace()).await, expected);
        assert_eq!(twice.count(&destination_namespace()).await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_a_missing_document_is_an_error() {
        let destination = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::upserts();
        let consumer = ChangeFeedConsumer::new(
            source(),
            destination_namespace(),
            key(),
            &upserts,
            &destination,
            &checkpoints,
        );

        let err = consumer
            .apply(&event(OperationType::Delete, 7, None, 1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteNotApplied);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upserts_without_full_document_are_skipped_but_checkpointed() {
        let destination = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::upserts();
        let consumer = ChangeFeedConsumer::new(
            source(),
            destination_namespace(),
            key(),
            &upserts,
            &destination,
            &checkpoints,
        );
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let events = vec![Ok(event(OperationType::Update, 3, None, 9))];
        let report = consumer
            .consume(stream::iter(events).boxed(), &mut shutdown_rx)
            .await;

        assert_eq!(report.processed, 1);
        assert_eq!(destination.count(&destination_namespace()).await, 0);
        assert_eq!(checkpoints.checkpoints().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operations_outside_the_allow_list_are_ignored() {
        let destination = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::from_names(&["insert"]);
        let consumer = ChangeFeedConsumer::new(
            source(),
            destination_namespace(),
            key(),
            &upserts,
            &destination,
            &checkpoints,
        );

        let replace = event(OperationType::Replace, 1, Some(document(1, "x")), 1);
        let invalidate = ChangeEvent {
            operation: OperationType::Other("invalidate".to_owned()),
            document_id: None,
            ..event(OperationType::Insert, 0, None, 2)
        };

        assert_eq!(consumer.apply(&replace).await.unwrap(), ApplyAction::Ignored);
        assert_eq!(consumer.apply(&invalidate).await.unwrap(), ApplyAction::Ignored);
        assert_eq!(destination.count(&destination_namespace()).await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn feed_errors_are_surfaced_as_is() {
        let destination = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::upserts();
        let consumer = ChangeFeedConsumer::new(
            source(),
            destination_namespace(),
            key(),
            &upserts,
            &destination,
            &checkpoints,
        );
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let events = vec![
            Ok(event(OperationType::Insert, 1, Some(document(1, "new")), 1)),
            Err(sync_error!(ErrorKind::ChangeFeedHistoryLost, "History lost")),
        ];
        let report = consumer
            .consume(stream::iter(events).boxed(), &mut shutdown_rx)
            .await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.result.unwrap_err().kind(), ErrorKind::ChangeFeedHistoryLost);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_on_shutdown() {
        let destination = MemoryStore::new();
        let checkpoints = MemoryCheckpointStore::new();
        let upserts = OperationFilter::upserts();
        let consumer = ChangeFeedConsumer::new(
            source(),
            destination_namespace(),
            key(),
            &upserts,
            &destination,
            &checkpoints,
        );
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown().unwrap();

        let report = consumer
            .consume(stream::pending::<SyncResult<ChangeEvent>>().boxed(), &mut shutdown_rx)
            .await;

        assert_eq!(report.processed, 0);
        assert!(report.result.is_ok());
    }
}
