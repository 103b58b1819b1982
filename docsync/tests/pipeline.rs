#![cfg(feature = "test-utils")]

use std::ops::Range;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use docsync::error::ErrorKind;
use docsync::pipeline::Pipeline;
use docsync::store::checkpoint::{CheckpointKey, CheckpointStore};
use docsync::store::document::memory::MemoryStore;
use docsync::store::document::{StartPosition, Store};
use docsync::sync_error;
use docsync::test_utils::collection::{collection_pair, document, namespace};
use docsync::test_utils::faulty_store::{FaultyStore, StoreMethod};
use docsync::test_utils::notifying_checkpoint_store::NotifyingCheckpointStore;
use docsync::test_utils::wait::{wait_for_count, wait_for_documents};
use docsync::types::{DocumentId, Namespace, OperationFilter};
use docsync::workers::collection::CollectionPhase;
use docsync_config::shared::{
    CollectionInfo, CollectionSyncSpec, CutoverBasis, CutoverConfig, PipelineConfig,
};
use docsync_telemetry::tracing::init_test_tracing;
use futures::StreamExt;
use serde_json::json;

type TestPipeline = Pipeline<FaultyStore<MemoryStore>, MemoryStore, NotifyingCheckpointStore>;

fn cutover() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn before_cutover() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 28, 12, 0, 0).unwrap()
}

fn pipeline_config(collections: Vec<CollectionSyncSpec>, retry_delay: Duration) -> PipelineConfig {
    PipelineConfig::new(collections)
        .with_cutover(CutoverConfig {
            basis: CutoverBasis::FirstOpTime,
            first_op_time: NaiveDate::from_ymd_opt(2024, 3, 1),
        })
        .with_retry_delay(retry_delay)
}

async fn seed(store: &MemoryStore, namespace: &Namespace, ids: Range<i64>) {
    for id in ids {
        store
            .insert_at(
                namespace,
                document(json!({ "_id": id, "seeded": true })),
                before_cutover(),
            )
            .await
            .unwrap();
    }
}

fn create_pipeline(
    config: PipelineConfig,
    source: &FaultyStore<MemoryStore>,
    destination: &MemoryStore,
    checkpoints: &NotifyingCheckpointStore,
) -> TestPipeline {
    Pipeline::new(
        config,
        source.clone(),
        destination.clone(),
        checkpoints.clone(),
    )
}

fn checkpoint_key(name: &str) -> CheckpointKey {
    let (db, collection) = name.split_once('.').unwrap();
    CheckpointKey::for_source(&CollectionInfo::new(db, collection))
}

#[tokio::test(flavor = "multi_thread")]
async fn copies_then_streams_two_collections() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();

    seed(source.store(), &namespace("shop.orders"), 0..100).await;
    seed(source.store(), &namespace("shop.users"), 0..3).await;

    let config = pipeline_config(
        vec![
            collection_pair("shop.orders", "archive.orders").with_copy(true),
            collection_pair("shop.users", "archive.users"),
        ],
        Duration::from_secs(3600),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    let subscribed = source.notify_on_subscriptions(2).await;
    pipeline.start().await.unwrap();
    subscribed.notified().await;

    assert_eq!(destination.count(&namespace("archive.orders")).await, 100);

    source
        .store()
        .insert(&namespace("shop.orders"), document(json!({ "_id": "a1" })))
        .await
        .unwrap();
    source
        .store()
        .delete_by_id(&namespace("shop.orders"), &DocumentId::new(5))
        .await
        .unwrap();
    source
        .store()
        .insert(&namespace("shop.users"), document(json!({ "_id": "b1" })))
        .await
        .unwrap();

    let orders = wait_for_documents(&destination, &namespace("archive.orders"), |documents| {
        documents.iter().any(|doc| doc["_id"] == json!("a1"))
            && documents.iter().all(|doc| doc["_id"] != json!(5))
    })
    .await;
    assert_eq!(orders.len(), 100);

    let users = wait_for_documents(&destination, &namespace("archive.users"), |documents| {
        !documents.is_empty()
    })
    .await;
    assert_eq!(users, vec![document(json!({ "_id": "b1" }))]);

    let checkpoint = checkpoints
        .get(&checkpoint_key("shop.orders"))
        .await
        .unwrap();
    assert!(checkpoint.is_some());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn no_collection_subscribes_before_every_copy_finished() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();

    seed(source.store(), &namespace("shop.orders"), 0..250).await;
    seed(source.store(), &namespace("shop.invoices"), 0..40).await;

    let config = pipeline_config(
        vec![
            collection_pair("shop.events", "archive.events"),
            collection_pair("shop.orders", "archive.orders").with_copy(true),
            collection_pair("shop.invoices", "archive.invoices").with_copy(true),
        ],
        Duration::from_secs(3600),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    let first_subscription = source.notify_on_subscriptions(1).await;
    pipeline.start().await.unwrap();
    first_subscription.notified().await;

    assert_eq!(destination.count(&namespace("archive.orders")).await, 250);
    assert_eq!(destination.count(&namespace("archive.invoices")).await, 40);
    assert!(pipeline.streaming_gate_open());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_position_on_first_subscribe_restarts_from_cutover_immediately() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();

    source
        .fail_next(
            StoreMethod::SubscribeChanges,
            sync_error!(
                ErrorKind::ChangeFeedFailed,
                "Change stream failed",
                "resume of change stream was not possible, as the resume point may no longer be in the oplog"
            ),
        )
        .await;

    // The retry delay is far longer than the wait below, only an immediate restart passes.
    let config = pipeline_config(
        vec![collection_pair("shop.orders", "archive.orders")],
        Duration::from_secs(3600),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    let resubscribed = source.notify_on_subscriptions(2).await;
    pipeline.start().await.unwrap();
    resubscribed.notified().await;

    let subscriptions = source.subscriptions().await;
    assert_eq!(subscriptions[0].start, StartPosition::At(cutover()));
    assert_eq!(subscriptions[1].start, StartPosition::At(cutover()));

    source
        .store()
        .insert(&namespace("shop.orders"), document(json!({ "_id": "x1" })))
        .await
        .unwrap();
    wait_for_count(&destination, &namespace("archive.orders"), 1).await;

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rotated_checkpoint_is_discarded_for_the_cutover() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();
    let orders = namespace("shop.orders");

    seed(source.store(), &orders, 0..2).await;

    // Checkpoint the first seeded change, then rotate both out of the history.
    let mut feed = source
        .store()
        .subscribe_changes(
            &orders,
            &OperationFilter::default(),
            StartPosition::At(before_cutover() - chrono::Duration::days(1)),
        )
        .await
        .unwrap();
    let first = feed.next().await.unwrap().unwrap();
    drop(feed);

    let key = checkpoint_key("shop.orders");
    checkpoints.save(&key, &first.resume_token).await.unwrap();
    source.store().rotate_history().await;

    let config = pipeline_config(
        vec![collection_pair("shop.orders", "archive.orders").with_copy(true)],
        Duration::from_secs(3600),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    let resubscribed = source.notify_on_subscriptions(2).await;
    pipeline.start().await.unwrap();
    resubscribed.notified().await;

    let subscriptions = source.subscriptions().await;
    assert_eq!(
        subscriptions[0].start,
        StartPosition::After(first.resume_token.clone())
    );
    assert_eq!(subscriptions[1].start, StartPosition::At(cutover()));

    // The checkpoint existed, so nothing was copied.
    assert_eq!(destination.count(&namespace("archive.orders")).await, 0);

    source
        .store()
        .insert(&orders, document(json!({ "_id": "after" })))
        .await
        .unwrap();
    wait_for_count(&destination, &namespace("archive.orders"), 1).await;

    let saves = checkpoints.notify_on_saves(2).await;
    saves.notified().await;
    let checkpoint = checkpoints.get(&key).await.unwrap().unwrap();
    assert_ne!(checkpoint.token, first.resume_token);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_failures_do_not_stop_streaming() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();
    checkpoints.fail_next_saves(1).await;

    let config = pipeline_config(
        vec![collection_pair("shop.orders", "archive.orders")],
        Duration::from_secs(3600),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    let subscribed = source.notify_on_subscriptions(1).await;
    pipeline.start().await.unwrap();
    subscribed.notified().await;

    for id in ["x1", "x2"] {
        source
            .store()
            .insert(&namespace("shop.orders"), document(json!({ "_id": id })))
            .await
            .unwrap();
    }

    wait_for_count(&destination, &namespace("archive.orders"), 2).await;
    checkpoints.notify_on_saves(2).await.notified().await;

    assert_eq!(checkpoints.checkpoints().await.len(), 1);
    assert_eq!(source.subscriptions().await.len(), 1);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_copy_is_retried_after_the_delay() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();

    seed(source.store(), &namespace("shop.orders"), 0..10).await;
    source
        .fail_next(
            StoreMethod::FindBefore,
            sync_error!(ErrorKind::StoreQueryFailed, "Cursor failed"),
        )
        .await;

    let config = pipeline_config(
        vec![collection_pair("shop.orders", "archive.orders").with_copy(true)],
        Duration::from_millis(100),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    let subscribed = source.notify_on_subscriptions(1).await;
    pipeline.start().await.unwrap();
    subscribed.notified().await;

    assert_eq!(destination.count(&namespace("archive.orders")).await, 10);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_interrupts_the_retry_delay() {
    init_test_tracing();

    let source = FaultyStore::new(MemoryStore::new());
    let destination = MemoryStore::new();
    let checkpoints = NotifyingCheckpointStore::new();

    source
        .fail_next(
            StoreMethod::SubscribeChanges,
            sync_error!(ErrorKind::StoreConnectionFailed, "Connection refused"),
        )
        .await;

    let config = pipeline_config(
        vec![collection_pair("shop.orders", "archive.orders")],
        Duration::from_secs(3600),
    );
    let mut pipeline = create_pipeline(config, &source, &destination, &checkpoints);

    pipeline.start().await.unwrap();

    let states = pipeline.worker_states().await;
    assert_eq!(states.len(), 1);
    let phase = tokio::time::timeout(
        Duration::from_secs(30),
        states[0].1.wait_for_phase(&[CollectionPhase::Retrying]),
    )
    .await
    .unwrap();
    assert_eq!(phase, CollectionPhase::Retrying);

    tokio::time::timeout(Duration::from_secs(30), pipeline.shutdown_and_wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(source.subscriptions().await.len(), 1);
    assert_eq!(states[0].1.phase(), CollectionPhase::Stopped);
}
