use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use changefeed_config::shared::BrokerConfig;
use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::broker::base::Broker;
use crate::error::IndexerResult;
use crate::types::BrokerMessage;

/// Upper bound of a seek issued by [`KafkaBroker::rewind`].
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// Logs the outcome of offset commits reported by the client.
struct IndexerConsumerContext;

impl ClientContext for IndexerConsumerContext {}

impl ConsumerContext for IndexerConsumerContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "offsets committed"),
            Err(err) => warn!(error = %err, "offset commit reported a failure"),
        }
    }
}

/// Offsets of the messages returned since the last commit, per partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRange {
    /// First returned offset, where a rewind repositions the consumer.
    first: i64,
    /// Offset following the last returned one, which a commit stores.
    next: i64,
}

#[derive(Debug, Default)]
struct PendingOffsets {
    partitions: BTreeMap<(String, i32), PendingRange>,
}

impl PendingOffsets {
    fn track(&mut self, message: &BrokerMessage) {
        let next = message.offset + 1;
        self.partitions
            .entry((message.topic.clone(), message.partition))
            .and_modify(|range| {
                range.first = range.first.min(message.offset);
                range.next = range.next.max(next);
            })
            .or_insert(PendingRange {
                first: message.offset,
                next,
            });
    }

    fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    fn commit_list(&self) -> KafkaResult<TopicPartitionList> {
        let mut list = TopicPartitionList::new();
        for ((topic, partition), range) in &self.partitions {
            list.add_partition_offset(topic, *partition, Offset::Offset(range.next))?;
        }

        Ok(list)
    }

    fn rewind_targets(&self) -> Vec<(String, i32, i64)> {
        self.partitions
            .iter()
            .map(|((topic, partition), range)| (topic.clone(), *partition, range.first))
            .collect()
    }

    fn clear(&mut self) {
        self.partitions.clear();
    }
}

/// [`Broker`] backed by a Kafka consumer group.
///
/// Auto commit is disabled: offsets only move through [`Broker::commit`]. Blocking client calls
/// (commit and seek) run on the blocking thread pool.
pub struct KafkaBroker {
    consumer: Arc<StreamConsumer<IndexerConsumerContext>>,
    max_poll_records: usize,
    pending: PendingOffsets,
}

impl KafkaBroker {
    pub fn new(config: &BrokerConfig, max_poll_records: usize) -> IndexerResult<Self> {
        let consumer: StreamConsumer<IndexerConsumerContext> =
            consumer_config(config).create_with_context(IndexerConsumerContext)?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group_id = %config.group_id,
            auto_offset_reset = config.auto_offset_reset.as_str(),
            "created kafka consumer"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            max_poll_records: max_poll_records.max(1),
            pending: PendingOffsets::default(),
        })
    }
}

/// Builds the consumer client configuration.
///
/// Pass-through properties are applied last, except `enable.auto.commit` which is always off.
fn consumer_config(config: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.group_id)
        .set("auto.offset.reset", config.auto_offset_reset.as_str());

    for (key, value) in &config.client_properties {
        client_config.set(key, value);
    }
    client_config.set("enable.auto.commit", "false");

    client_config
}

/// Returns whether a consumer error only reports a temporary loss of connectivity.
///
/// The client reconnects on its own after these, so a poll reporting one returns no messages
/// instead of failing.
fn is_transient_consumer_error(err: &KafkaError) -> bool {
    match err {
        KafkaError::PartitionEOF(_) => true,
        KafkaError::MessageConsumption(code) => matches!(
            code,
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::Resolve
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::BrokerNotAvailable
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::CoordinatorNotAvailable
        ),
        _ => false,
    }
}

fn to_broker_message(message: &BorrowedMessage<'_>) -> BrokerMessage {
    BrokerMessage {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message.payload().map(Bytes::copy_from_slice),
    }
}

impl Broker for KafkaBroker {
    fn name() -> &'static str {
        "kafka"
    }

    async fn subscribe(&mut self, topic: &str) -> IndexerResult<()> {
        self.consumer.subscribe(&[topic])?;
        info!(topic, "subscribed to topic");

        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> IndexerResult<Vec<BrokerMessage>> {
        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(message)) => to_broker_message(&message),
            Ok(Err(err)) if is_transient_consumer_error(&err) => {
                warn!(error = %err, "transient consumer error, polling again");
                return Ok(Vec::new());
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Ok(Vec::new()),
        };

        let mut messages = vec![first];
        // Only messages that are already fetched are drained, the wait is over.
        while messages.len() < self.max_poll_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => messages.push(to_broker_message(&message)),
                Some(Err(err)) => {
                    warn!(error = %err, "stopping drain of fetched messages after an error");
                    break;
                }
                None => break,
            }
        }

        for message in &messages {
            self.pending.track(message);
        }

        Ok(messages)
    }

    async fn commit(&mut self) -> IndexerResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let offsets = self.pending.commit_list()?;
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync)).await??;

        self.pending.clear();

        Ok(())
    }

    async fn rewind(&mut self) -> IndexerResult<()> {
        let targets = self.pending.rewind_targets();
        if targets.is_empty() {
            return Ok(());
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || {
            for (topic, partition, offset) in &targets {
                consumer.seek(topic, *partition, Offset::Offset(*offset), SEEK_TIMEOUT)?;
                debug!(topic = %topic, partition, offset, "rewound partition");
            }

            Ok::<_, KafkaError>(())
        })
        .await??;

        self.pending.clear();

        Ok(())
    }

    async fn close(&mut self) -> IndexerResult<()> {
        self.consumer.unsubscribe();
        info!("kafka consumer unsubscribed");

        Ok(())
    }
}
