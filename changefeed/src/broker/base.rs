use std::future::Future;
use std::time::Duration;

use crate::error::IndexerResult;
use crate::types::BrokerMessage;

/// A partitioned log consumed by a consumer group.
///
/// The broker remembers which messages [`Broker::poll`] returned since the last
/// [`Broker::commit`], so that a commit covers exactly those and a [`Broker::rewind`] can
/// redeliver them.
pub trait Broker {
    /// Returns the name of the broker, used in logs.
    fn name() -> &'static str;

    fn subscribe(&mut self, topic: &str) -> impl Future<Output = IndexerResult<()>> + Send;

    /// Waits up to `timeout` for messages.
    ///
    /// Returns as soon as at least one message is available, together with the messages already
    /// fetched up to the configured maximum. Returns an empty vector when the wait elapsed.
    ///
    /// Dropping the returned future before completion must not lose messages.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = IndexerResult<Vec<BrokerMessage>>> + Send;

    /// Synchronously commits the offsets of every message returned since the last commit.
    fn commit(&mut self) -> impl Future<Output = IndexerResult<()>> + Send;

    /// Repositions the consumer at the last committed offsets, so that messages returned since
    /// then are delivered again by the next polls.
    fn rewind(&mut self) -> impl Future<Output = IndexerResult<()>> + Send;

    fn close(&mut self) -> impl Future<Output = IndexerResult<()>> + Send;
}
