use chrono::{DateTime, Utc};
use docsync_config::shared::CollectionSyncSpec;
use futures::StreamExt;
use metrics::counter;
use tracing::{info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SyncResult};
use crate::metrics::{DOCSYNC_DOCUMENTS_COPIED_TOTAL, SOURCE_LABEL};
use crate::store::document::Store;
use crate::types::{DocumentId, Namespace};

/// Result of a snapshot copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyResult {
    /// Every document older than the cutover was written to the destination.
    Completed { copied: u64 },
    /// Shutdown was requested before the copy finished.
    Stopped { copied: u64 },
}

/// Copies the documents of the source collection created before `cutover` into the destination.
///
/// When the pair asks for it, the destination collection is dropped first. A failed drop is
/// logged and the copy proceeds. Documents are upserted by `_id`, so re-running a partially
/// completed copy converges to the same destination state.
pub async fn copy_collection<S, D>(
    spec: &CollectionSyncSpec,
    cutover: DateTime<Utc>,
    source: &S,
    destination: &D,
    shutdown_rx: &mut ShutdownRx,
) -> SyncResult<CopyResult>
where
    S: Store,
    D: Store,
{
    let source_namespace = Namespace::from(&spec.source);
    let destination_namespace = Namespace::from(&spec.destination);

    if spec.drop {
        match destination.drop_collection(&destination_namespace).await {
            Ok(()) => info!(destination = %destination_namespace, "dropped destination collection"),
            Err(err) => warn!(
                destination = %destination_namespace,
                error = %err,
                "failed to drop destination collection, copying anyway"
            ),
        }
    }

    let mut records = source.find_before(&source_namespace, cutover).await?;

    info!(
        source = %source_namespace,
        destination = %destination_namespace,
        cutover = %cutover.to_rfc3339(),
        "copying documents created before cutover"
    );

    let mut copied = 0u64;
    loop {
        let record = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!(source = %source_namespace, copied, "shutdown requested, interrupting copy");

                return Ok(CopyResult::Stopped { copied });
            }

            record = records.next() => record,
        };

        let Some(record) = record else {
            break;
        };
        let document = record?;

        let Some(id) = DocumentId::from_document(&document) else {
            bail!(
                ErrorKind::MissingDocumentId,
                "Source document has no _id",
                source_namespace.to_string()
            );
        };

        if !destination
            .upsert_by_id(&destination_namespace, &id, document)
            .await?
        {
            bail!(
                ErrorKind::WriteNotApplied,
                "Copied document was not applied",
                format!("{destination_namespace} _id {id}")
            );
        }

        copied += 1;
        counter!(DOCSYNC_DOCUMENTS_COPIED_TOTAL, SOURCE_LABEL => source_namespace.to_string())
            .increment(1);
    }

    info!(
        source = %source_namespace,
        destination = %destination_namespace,
        copied,
        "finished copying documents"
    );

    Ok(CopyResult::Completed { copied })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use docsync_config::shared::CollectionInfo;
    use serde_json::json;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::store::document::memory::MemoryStore;
    use crate::types::Document;

    fn spec() -> CollectionSyncSpec {
        CollectionSyncSpec::new(
            CollectionInfo::new("shop", "orders"),
            CollectionInfo::new("archive", "orders"),
        )
        .with_copy(true)
    }

    fn cutover() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn order(id: i64) -> Document {
        json!({ "_id": id, "total": id * 10 })
            .as_object()
            .cloned()
            .unwrap()
    }

    async fn seed(store: &MemoryStore, ids: std::ops::Range<i64>, created_at: DateTime<Utc>) {
        let namespace = Namespace::new("shop", "orders");
        for id in ids {
            store.insert_at(&namespace, order(id), created_at).await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn copies_only_documents_older_than_cutover() {
        let source = MemoryStore::new();
        let destination = MemoryStore::new();
        seed(&source, 0..5, cutover() - Duration::days(2)).await;
        seed(&source, 5..8, cutover() + Duration::hours(1)).await;
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        let result = copy_collection(&spec(), cutover(), &source, &destination, &mut shutdown_rx)
            .await
            .unwrap();

        assert_eq!(result, CopyResult::Completed { copied: 5 });
        let copied = destination.documents(&Namespace::new("archive", "orders")).await;
        assert_eq!(copied.len(), 5);
        assert!(copied.iter().all(|doc| doc["_id"].as_i64().unwrap() < 5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drop_clears_the_destination_first() {
        let source = MemoryStore::new();
        let destination = MemoryStore::new();
        seed(&source, 0..2, cutover() - Duration::days(1)).await;
        destination
            .insert_at(&Namespace::new("archive", "orders"), order(99), cutover())
            .await
            .unwrap();
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        copy_collection(
            &spec().with_drop(true),
            cutover(),
            &source,
            &destination,
            &mut shutdown_rx,
        )
        .await
        .unwrap();

        let ids: Vec<_> = destination
            .documents(&Namespace::new("archive", "orders"))
            .await
            .into_iter()
            .map(|doc| doc["_id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(0), json!(1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rerunning_converges_to_the_same_state() {
        let source = MemoryStore::new();
        let destination = MemoryStore::new();
        seed(&source, 0..4, cutover() - Duration::days(1)).await;
        let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

        for _ in 0..2 {
            copy_collection(&spec(), cutover(), &source, &destination, &mut shutdown_rx)
                .await
                .unwrap();
        }

        assert_eq!(destination.count(&Namespace::new("archive", "orders")).await, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_when_shutdown_was_requested() {
        let source = MemoryStore::new();
        let destination = MemoryStore::new();
        seed(&source, 0..3, cutover() - Duration::days(1)).await;
        let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();
        shutdown_tx.shutdown().unwrap();

        let result = copy_collection(&spec(), cutover(), &source, &destination, &mut shutdown_rx)
            .await
            .unwrap();

        assert_eq!(result, CopyResult::Stopped { copied: 0 });
    }
}
