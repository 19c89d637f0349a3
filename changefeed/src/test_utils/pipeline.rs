use std::time::Duration;

use serde_json::{Value, json};

use crate::broker::Broker;
use crate::broker::memory::MemoryBroker;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::store::IndexStore;

pub const TEST_TOPIC: &str = "wikimedia.recentchange";
pub const TEST_INDEX: &str = "wikimedia";

/// Poll timeout short enough for tests waiting on empty polls.
pub const TEST_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Settings for [`TEST_TOPIC`] and [`TEST_INDEX`] with a short poll timeout and no pacing.
pub fn test_settings() -> PipelineSettings {
    PipelineSettings::new(TEST_TOPIC, TEST_INDEX).with_poll_timeout(TEST_POLL_TIMEOUT)
}

/// Memory broker serving [`TEST_TOPIC`].
pub fn test_broker(max_poll_records: usize) -> MemoryBroker {
    MemoryBroker::new(TEST_TOPIC, max_poll_records)
}

pub fn create_pipeline<B, S>(broker: B, store: S) -> Pipeline<B, S>
where
    B: Broker + Send + Sync + 'static,
    S: IndexStore + Send + Sync + 'static,
{
    Pipeline::new(test_settings(), broker, store)
}

/// Builds a change event shaped like the public recent change stream.
pub fn change_event(id: &str, title: &str) -> Value {
    json!({
        "$schema": "/mediawiki/recentchange/1.0.0",
        "meta": {
            "id": id,
            "domain": "en.wikipedia.org",
            "stream": "mediawiki.recentchange",
        },
        "type": "edit",
        "title": title,
        "user": "Example",
        "bot": false,
    })
}

/// Serializes [`change_event`] into a broker payload.
pub fn change_event_payload(id: &str, title: &str) -> String {
    change_event(id, title).to_string()
}

/// Publishes one change event per identifier, titled after the identifier.
pub async fn publish_change_events(broker: &MemoryBroker, ids: &[&str]) {
    for id in ids {
        broker
            .publish(change_event_payload(id, &format!("Page {id}")))
            .await;
    }
}
