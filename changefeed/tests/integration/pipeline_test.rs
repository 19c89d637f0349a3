use changefeed::error::ErrorKind;
use changefeed::store::memory::MemoryIndexStore;
use changefeed::test_utils::faults::{FaultInjectingBroker, FaultInjectingStore};
use changefeed::test_utils::notify::TimedNotify;
use changefeed::test_utils::pipeline::{
    TEST_INDEX, create_pipeline, publish_change_events, test_broker,
};
use changefeed::types::DocumentId;
use changefeed::workers::consume::LoopState;
use changefeed_telemetry::tracing::init_test_tracing;
use serde_json::Value;

async fn indexed_ids(store: &MemoryIndexStore) -> Vec<String> {
    store
        .documents(TEST_INDEX)
        .await
        .into_iter()
        .map(|(id, _)| id.into_inner())
        .collect()
}

async fn indexed_title(store: &MemoryIndexStore, id: &str) -> Option<Value> {
    store
        .document(TEST_INDEX, &DocumentId::from(id))
        .await
        .and_then(|document| document.get("title").cloned())
}

#[tokio::test(flavor = "multi_thread")]
async fn consumed_messages_are_indexed_then_committed() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    publish_change_events(&broker, &["a", "b", "c"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(3).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert!(store.has_index(TEST_INDEX).await);
    assert_eq!(indexed_ids(&store).await, vec!["a", "b", "c"]);
    assert_eq!(broker.committed_offset().await, 3);
    assert_eq!(broker.commit_count().await, 1);
    assert_eq!(store.bulk_calls().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_polls_neither_submit_nor_commit() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let polled = TimedNotify::new(broker.notify_on_polls(3).await);

    pipeline.start().await.unwrap();
    polled.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.bulk_calls().await, 0);
    assert_eq!(broker.commit_count().await, 0);
    // The index is still created on startup.
    assert!(store.has_index(TEST_INDEX).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn unusable_messages_are_skipped_and_committed_with_the_batch() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    broker.publish("not json".to_owned()).await;
    broker.publish_tombstone().await;
    broker.publish(r#"{"meta":{"domain":"en.wikipedia.org"}}"#.to_owned()).await;
    broker.publish(r#"["meta"]"#.to_owned()).await;
    publish_change_events(&broker, &["d"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(5).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(indexed_ids(&store).await, vec!["d"]);
    assert_eq!(broker.rewind_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cycle_without_documents_is_committed_by_the_next_batch() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    broker.publish("garbage".to_owned()).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let polled = TimedNotify::new(broker.notify_on_polls(3).await);

    pipeline.start().await.unwrap();
    polled.notified().await;

    assert_eq!(broker.commit_count().await, 0);
    assert_eq!(store.bulk_calls().await, 0);

    let committed = TimedNotify::new(broker.notify_on_committed_offset(2).await);
    publish_change_events(&broker, &["a"]).await;
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(indexed_ids(&store).await, vec!["a"]);
    assert_eq!(broker.commit_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn later_duplicate_in_a_batch_wins() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    broker
        .publish(r#"{"meta":{"id":"a"},"title":"first"}"#.to_owned())
        .await;
    broker
        .publish(r#"{"meta":{"id":"a"},"title":"second"}"#.to_owned())
        .await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(2).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(indexed_ids(&store).await, vec!["a"]);
    assert_eq!(
        indexed_title(&store, "a").await,
        Some(Value::from("second"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn store_outage_is_retried_by_redelivery() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    store
        .fail_next_bulks(2, ErrorKind::StoreConnectionFailed)
        .await;
    publish_change_events(&broker, &["a", "b"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(2).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.bulk_attempts().await, 3);
    assert_eq!(broker.rewind_count().await, 2);
    assert_eq!(broker.commit_count().await, 1);
    assert_eq!(indexed_ids(store.get_inner()).await, vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_commit_redelivers_and_reindexes_the_same_documents() {
    init_test_tracing();
    let broker = FaultInjectingBroker::wrap(test_broker(10));
    let store = MemoryIndexStore::new();
    broker.fail_next_commits(1).await;
    publish_change_events(broker.get_inner(), &["a", "b"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.get_inner().notify_on_committed_offset(2).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    // Both submissions wrote the same two documents.
    assert_eq!(store.bulk_calls().await, 2);
    assert_eq!(indexed_ids(&store).await, vec!["a", "b"]);
    assert_eq!(broker.get_inner().rewind_count().await, 1);
    assert_eq!(broker.get_inner().commit_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_documents_do_not_block_the_commit() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    store.reject_documents(["b"]).await;
    publish_change_events(&broker, &["a", "b", "c"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(3).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(indexed_ids(store.get_inner()).await, vec!["a", "c"]);
    assert_eq!(broker.rewind_count().await, 0);
    assert_eq!(store.bulk_attempts().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_during_a_cycle_are_retried_by_redelivery() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    store
        .fail_next_bulks(1, ErrorKind::StoreAuthenticationFailed)
        .await;
    publish_change_events(&broker, &["a"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(1).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.bulk_attempts().await, 2);
    assert_eq!(broker.rewind_count().await, 1);
    assert_eq!(broker.commit_count().await, 1);
    assert_eq!(indexed_ids(store.get_inner()).await, vec!["a"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_while_starting_are_fatal() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    store
        .fail_index_checks(ErrorKind::StoreAuthenticationFailed)
        .await;
    publish_change_events(&broker, &["a"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let state_rx = pipeline.state_rx();

    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoreAuthenticationFailed);
    assert_eq!(store.bulk_attempts().await, 0);
    assert_eq!(broker.commit_count().await, 0);
    assert!(broker.is_closed().await);
    assert!(store.get_inner().is_closed().await);
    assert_eq!(*state_rx.borrow(), LoopState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn unexpected_store_error_stops_the_loop_without_committing() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    store.fail_next_bulks(1, ErrorKind::Unknown).await;
    publish_change_events(&broker, &["a"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());

    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert_eq!(broker.commit_count().await, 0);
    assert_eq!(broker.committed_offset().await, 0);
    assert!(broker.is_closed().await);
    assert!(store.get_inner().is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_failure_is_fatal() {
    init_test_tracing();
    let broker = FaultInjectingBroker::wrap(test_broker(10));
    let store = MemoryIndexStore::new();
    broker.fail_next_polls(1).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());

    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BrokerPollFailed);
    assert!(broker.get_inner().is_closed().await);
    assert!(store.is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_rewind_is_fatal() {
    init_test_tracing();
    let broker = FaultInjectingBroker::wrap(test_broker(10));
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    store
        .fail_next_bulks(1, ErrorKind::StoreRequestFailed)
        .await;
    broker.fail_next_rewinds(1).await;
    publish_change_events(broker.get_inner(), &["a"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());

    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BrokerSeekFailed);
    assert_eq!(broker.get_inner().commit_count().await, 0);
    assert!(store.get_inner().is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_to_a_missing_topic_is_fatal() {
    init_test_tracing();
    let broker = changefeed::broker::memory::MemoryBroker::new("other.topic", 10);
    let store = MemoryIndexStore::new();

    let mut pipeline = create_pipeline(broker.clone(), store.clone());

    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BrokerSubscribeFailed);
    assert!(broker.is_closed().await);
    assert!(store.is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_twice_is_rejected() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();

    let mut pipeline = create_pipeline(broker, store);

    pipeline.start().await.unwrap();
    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    pipeline.shutdown_and_wait().await.unwrap();
}
