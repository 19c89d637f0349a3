use std::time::Duration;

use changefeed::store::memory::MemoryIndexStore;
use changefeed::test_utils::faults::{FaultInjectingBroker, FaultInjectingStore};
use changefeed::test_utils::notify::TimedNotify;
use changefeed::test_utils::pipeline::{
    create_pipeline, publish_change_events, test_broker, test_settings,
};
use changefeed::pipeline::Pipeline;
use changefeed::workers::consume::LoopState;
use changefeed_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_while_polling_closes_both_clients_without_committing() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let mut shutdown_handle = pipeline.shutdown_handle();
    let state_rx = pipeline.state_rx();
    let polled = TimedNotify::new(broker.notify_on_polls(1).await);

    pipeline.start().await.unwrap();
    polled.notified().await;

    // Returns only once the loop reported itself closed.
    shutdown_handle.shutdown_and_wait().await;

    assert!(shutdown_handle.is_closed());
    assert_eq!(*state_rx.borrow(), LoopState::Closed);
    assert!(broker.is_closed().await);
    assert!(store.is_closed().await);
    assert_eq!(broker.commit_count().await, 0);

    pipeline.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_interrupts_a_long_poll() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();

    let settings = test_settings().with_poll_timeout(Duration::from_secs(3600));
    let mut pipeline = Pipeline::new(settings, broker.clone(), store.clone());
    let polled = TimedNotify::new(broker.notify_on_polls(1).await);

    pipeline.start().await.unwrap();
    polled.notified().await;

    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown_and_wait())
        .await
        .expect("the poll wait was not interrupted")
        .unwrap();

    assert!(broker.is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_interrupts_the_pacing_wait() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    publish_change_events(&broker, &["a"]).await;

    let settings = test_settings().with_pacing(Duration::from_secs(3600));
    let mut pipeline = Pipeline::new(settings, broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(1).await);

    pipeline.start().await.unwrap();
    committed.notified().await;

    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown_and_wait())
        .await
        .expect("the pacing wait was not interrupted")
        .unwrap();

    assert_eq!(broker.committed_offset().await, 1);
    assert!(store.is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn triggering_shutdown_again_has_no_effect() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();

    let mut pipeline = create_pipeline(broker, store);
    let mut first = pipeline.shutdown_handle();
    let mut second = pipeline.shutdown_handle();

    pipeline.start().await.unwrap();

    assert!(first.trigger());
    assert!(!second.trigger());

    first.shutdown_and_wait().await;
    second.shutdown_and_wait().await;
    pipeline.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_is_attempted_on_both_clients_when_both_fail() {
    init_test_tracing();
    let broker = FaultInjectingBroker::wrap(test_broker(10));
    let store = FaultInjectingStore::wrap(MemoryIndexStore::new());
    broker.fail_close().await;
    store.fail_close().await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let polled = TimedNotify::new(broker.get_inner().notify_on_polls(1).await);

    pipeline.start().await.unwrap();
    polled.notified().await;

    // Close failures are logged, a requested shutdown still ends cleanly.
    pipeline.shutdown_and_wait().await.unwrap();

    assert!(broker.get_inner().is_closed().await);
    assert!(store.get_inner().is_closed().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_before_start_is_observed_immediately() {
    init_test_tracing();
    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    publish_change_events(&broker, &["a"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    pipeline.shutdown();
    pipeline.start().await.unwrap();
    pipeline.wait().await.unwrap();

    assert_eq!(broker.commit_count().await, 0);
    assert!(store.documents("wikimedia").await.is_empty());
    assert!(broker.is_closed().await);
}
