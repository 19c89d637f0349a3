use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::info;

use crate::bail;
use crate::broker::base::Broker;
use crate::error::{ErrorKind, IndexerResult};
use crate::types::BrokerMessage;

/// Condition a test waits on.
#[derive(Debug, Clone, Copy)]
enum Condition {
    CommittedOffset(i64),
    Polls(usize),
    Rewinds(usize),
}

#[derive(Debug)]
struct Inner {
    topic: String,
    log: Vec<BrokerMessage>,
    subscription: Option<String>,
    /// Index of the next message to deliver.
    position: usize,
    /// Index of the first message not covered by a commit.
    committed: usize,
    polls: usize,
    commits: usize,
    rewinds: usize,
    closed: bool,
    waiters: Vec<(Condition, Arc<Notify>)>,
}

impl Inner {
    fn is_met(&self, condition: Condition) -> bool {
        match condition {
            Condition::CommittedOffset(offset) => self.committed as i64 >= offset,
            Condition::Polls(polls) => self.polls >= polls,
            Condition::Rewinds(rewinds) => self.rewinds >= rewinds,
        }
    }

    fn wake_waiters(&mut self) {
        let (met, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|(condition, _)| self.is_met(*condition));

        self.waiters = pending;
        for (_, notify) in met {
            notify.notify_one();
        }
    }
}

/// Single partition in-memory log implementing [`Broker`] for tests and local runs.
///
/// Clones share the same log and consumer group position, which lets a test publish messages
/// and inspect commits while the consume-commit loop owns another clone.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    appended: Arc<Notify>,
    max_poll_records: usize,
}

impl MemoryBroker {
    pub const PARTITION: i32 = 0;

    pub fn new(topic: impl Into<String>, max_poll_records: usize) -> Self {
        let inner = Inner {
            topic: topic.into(),
            log: Vec::new(),
            subscription: None,
            position: 0,
            committed: 0,
            polls: 0,
            commits: 0,
            rewinds: 0,
            closed: false,
            waiters: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            appended: Arc::new(Notify::new()),
            max_poll_records: max_poll_records.max(1),
        }
    }

    /// Appends a message to the log and returns its offset.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> i64 {
        self.append(Some(payload.into())).await
    }

    /// Appends a message without payload and returns its offset.
    pub async fn publish_tombstone(&self) -> i64 {
        self.append(None).await
    }

    async fn append(&self, payload: Option<Bytes>) -> i64 {
        let offset = {
            let mut inner = self.inner.lock().await;
            let offset = inner.log.len() as i64;
            let message = BrokerMessage::new(inner.topic.clone(), Self::PARTITION, offset, payload);
            inner.log.push(message);
            offset
        };

        self.appended.notify_waiters();

        offset
    }

    /// Simulates a fresh consumer of the same group: delivery restarts at the committed offset.
    pub async fn restart(&self) {
        let mut inner = self.inner.lock().await;
        inner.position = inner.committed;
        inner.subscription = None;
        inner.closed = false;
    }

    /// Offset of the first message not covered by a commit.
    pub async fn committed_offset(&self) -> i64 {
        self.inner.lock().await.committed as i64
    }

    pub async fn commit_count(&self) -> usize {
        self.inner.lock().await.commits
    }

    pub async fn rewind_count(&self) -> usize {
        self.inner.lock().await.rewinds
    }

    pub async fn poll_count(&self) -> usize {
        self.inner.lock().await.polls
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Returns a notification fired once the committed offset reaches `offset`.
    pub async fn notify_on_committed_offset(&self, offset: i64) -> Arc<Notify> {
        self.notify_on(Condition::CommittedOffset(offset)).await
    }

    /// Returns a notification fired once `polls` polls have started.
    pub async fn notify_on_polls(&self, polls: usize) -> Arc<Notify> {
        self.notify_on(Condition::Polls(polls)).await
    }

    /// Returns a notification fired once the broker was rewound `rewinds` times.
    pub async fn notify_on_rewinds(&self, rewinds: usize) -> Arc<Notify> {
        self.notify_on(Condition::Rewinds(rewinds)).await
    }

    async fn notify_on(&self, condition: Condition) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        if inner.is_met(condition) {
            notify.notify_one();
        } else {
            inner.waiters.push((condition, Arc::clone(&notify)));
        }

        notify
    }
}

impl Broker for MemoryBroker {
    fn name() -> &'static str {
        "memory"
    }

    async fn subscribe(&mut self, topic: &str) -> IndexerResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.topic != topic {
            bail!(
                ErrorKind::BrokerSubscribeFailed,
                "Topic does not exist",
                format!("`{topic}` is not served by this broker")
            );
        }

        info!(topic, "subscribed to in-memory topic");
        inner.subscription = Some(topic.to_owned());

        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> IndexerResult<Vec<BrokerMessage>> {
        let deadline = Instant::now() + timeout;

        {
            let mut inner = self.inner.lock().await;
            inner.polls += 1;
            inner.wake_waiters();
        }

        loop {
            // Registered before checking the log so that an append in between is not missed.
            let appended = self.appended.notified();

            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    bail!(ErrorKind::InvalidState, "Broker is closed");
                }
                if inner.subscription.is_none() {
                    bail!(ErrorKind::InvalidState, "Broker polled before subscribing");
                }

                if inner.position < inner.log.len() {
                    let end = (inner.position + self.max_poll_records).min(inner.log.len());
                    let messages = inner.log[inner.position..end].to_vec();
                    inner.position = end;

                    return Ok(messages);
                }
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self) -> IndexerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.committed = inner.position;
        inner.commits += 1;
        inner.wake_waiters();

        Ok(())
    }

    async fn rewind(&mut self) -> IndexerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.position = inner.committed;
        inner.rewinds += 1;
        inner.wake_waiters();

        Ok(())
    }

    async fn close(&mut self) -> IndexerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.subscription = None;

        Ok(())
    }
}
