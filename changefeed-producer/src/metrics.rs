//! Metric names emitted by the producer.

/// Label for the topic events are published to.
pub const TOPIC_LABEL: &str = "topic";

/// Counter of events handed to the Kafka producer.
pub const CHANGEFEED_EVENTS_PUBLISHED_TOTAL: &str = "changefeed_events_published_total";

/// Counter of events whose delivery the broker did not acknowledge.
pub const CHANGEFEED_EVENT_DELIVERY_FAILURES_TOTAL: &str =
    "changefeed_event_delivery_failures_total";

/// Counter of upstream feed reconnections.
pub const CHANGEFEED_FEED_RECONNECTS_TOTAL: &str = "changefeed_feed_reconnects_total";
