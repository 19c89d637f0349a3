use metrics::counter;
use tracing::warn;

use crate::extract::IdentifierExtractor;
use crate::metrics::{CHANGEFEED_MESSAGES_SKIPPED_TOTAL, ERROR_KIND_LABEL, TOPIC_LABEL};
use crate::types::{BrokerMessage, IndexOp};

/// The index operations built from one poll cycle.
///
/// A batch is created empty at the start of a cycle and handed to the store gateway exactly once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<IndexOp>,
    consumed: usize,
    skipped: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of index operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of messages the batch was built from, skipped ones included.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Number of messages that did not produce an operation.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn ops(&self) -> &[IndexOp] {
        &self.ops
    }
}

/// Turns the messages of a poll cycle into a [`Batch`].
///
/// A message whose identifier or document cannot be derived is skipped and logged. Skipping never
/// aborts the rest of the batch.
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    index: String,
    extractor: IdentifierExtractor,
}

impl BatchAccumulator {
    pub fn new(index: impl Into<String>, extractor: IdentifierExtractor) -> Self {
        Self {
            index: index.into(),
            extractor,
        }
    }

    pub fn accumulate(&self, messages: &[BrokerMessage]) -> Batch {
        let mut batch = Batch::new();
        for message in messages {
            self.append(&mut batch, message);
        }

        batch
    }

    /// Appends the operation derived from `message` to `batch`, or counts it as skipped.
    pub fn append(&self, batch: &mut Batch, message: &BrokerMessage) {
        batch.consumed += 1;

        match self.extractor.extract(message) {
            Ok(extracted) => batch.ops.push(IndexOp {
                index: self.index.clone(),
                id: extracted.id,
                document: extracted.document,
            }),
            Err(err) => {
                batch.skipped += 1;

                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "skipping message that cannot be indexed"
                );
                counter!(
                    CHANGEFEED_MESSAGES_SKIPPED_TOTAL,
                    TOPIC_LABEL => message.topic.clone(),
                    ERROR_KIND_LABEL => format!("{:?}", err.kind())
                )
                .increment(1);
            }
        }
    }
}
