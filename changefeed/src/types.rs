//! Values flowing through the consume-commit loop.

use std::fmt;

use bytes::Bytes;
use serde_json::Value;

/// A record delivered by the broker.
///
/// The payload is absent for tombstones. Messages are owned by the loop for the duration of one
/// poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
}

impl BrokerMessage {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Formats the broker coordinates as `{topic}-{partition}-{offset}`.
    pub fn coordinates(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }
}

/// Identifier of a document in the store.
///
/// Derived deterministically from a message, so that redelivered messages overwrite the document
/// they produced earlier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single `index` action of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOp {
    pub index: String,
    pub id: DocumentId,
    /// Always a JSON object.
    pub document: Value,
}
