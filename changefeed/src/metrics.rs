//! Metric names emitted by the indexing pipeline.

/// Label for the target index.
pub const INDEX_LABEL: &str = "index";

/// Label for the consumed topic.
pub const TOPIC_LABEL: &str = "topic";

/// Label for the error kind of a failed operation.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Counter of messages returned by broker polls.
pub const CHANGEFEED_MESSAGES_RECEIVED_TOTAL: &str = "changefeed_messages_received_total";

/// Counter of messages skipped because no document could be built from them.
pub const CHANGEFEED_MESSAGES_SKIPPED_TOTAL: &str = "changefeed_messages_skipped_total";

/// Counter of documents the store acknowledged.
pub const CHANGEFEED_DOCUMENTS_INDEXED_TOTAL: &str = "changefeed_documents_indexed_total";

/// Counter of documents the store rejected inside an otherwise successful bulk request.
pub const CHANGEFEED_DOCUMENTS_REJECTED_TOTAL: &str = "changefeed_documents_rejected_total";

/// Counter of bulk submissions that failed as a whole.
pub const CHANGEFEED_BULK_FAILURES_TOTAL: &str = "changefeed_bulk_failures_total";

/// Histogram of bulk submission round trips in seconds.
pub const CHANGEFEED_BULK_DURATION_SECONDS: &str = "changefeed_bulk_duration_seconds";

/// Counter of successful offset commits.
pub const CHANGEFEED_COMMITS_TOTAL: &str = "changefeed_commits_total";

/// Counter of failed offset commits.
pub const CHANGEFEED_COMMIT_FAILURES_TOTAL: &str = "changefeed_commit_failures_total";

/// Counter of broker rewinds after an abandoned cycle.
pub const CHANGEFEED_REWINDS_TOTAL: &str = "changefeed_rewinds_total";
