use changefeed::error::ErrorKind;
use changefeed::failpoints::{SUBMIT_BULK__BEFORE_COMMIT, SUBMIT_BULK__BEFORE_SEND};
use changefeed::store::memory::MemoryIndexStore;
use changefeed::test_utils::failpoints::FailPointGuard;
use changefeed::test_utils::notify::TimedNotify;
use changefeed::test_utils::pipeline::{
    TEST_INDEX, create_pipeline, publish_change_events, test_broker,
};
use changefeed_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn crash_between_submit_and_commit_is_redelivered_after_restart() {
    init_test_tracing();
    let _fail_points = FailPointGuard::setup(&[(SUBMIT_BULK__BEFORE_COMMIT, "1*return(fatal)")]);

    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    publish_change_events(&broker, &["a", "b"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithFatal);
    assert_eq!(store.documents(TEST_INDEX).await.len(), 2);
    assert_eq!(broker.committed_offset().await, 0);

    // A new consumer of the same group resumes from the last commit.
    broker.restart().await;
    let committed = TimedNotify::new(broker.notify_on_committed_offset(2).await);
    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    // The redelivered messages overwrote the documents instead of duplicating them.
    assert_eq!(store.bulk_calls().await, 2);
    assert_eq!(store.documents(TEST_INDEX).await.len(), 2);
    assert_eq!(broker.commit_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn recoverable_failure_before_commit_rewinds() {
    init_test_tracing();
    let _fail_points =
        FailPointGuard::setup(&[(SUBMIT_BULK__BEFORE_COMMIT, "1*return(recoverable)")]);

    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    publish_change_events(&broker, &["a", "b", "c"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    let committed = TimedNotify::new(broker.notify_on_committed_offset(3).await);

    pipeline.start().await.unwrap();
    committed.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(broker.rewind_count().await, 1);
    assert_eq!(store.bulk_calls().await, 2);
    assert_eq!(store.documents(TEST_INDEX).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_failure_before_send_leaves_the_store_untouched() {
    init_test_tracing();
    let _fail_points = FailPointGuard::setup(&[(SUBMIT_BULK__BEFORE_SEND, "1*return")]);

    let broker = test_broker(10);
    let store = MemoryIndexStore::new();
    publish_change_events(&broker, &["a"]).await;

    let mut pipeline = create_pipeline(broker.clone(), store.clone());
    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithFatal);
    assert_eq!(store.bulk_calls().await, 0);
    assert_eq!(broker.commit_count().await, 0);
    assert!(broker.is_closed().await);
    assert!(store.is_closed().await);
}
