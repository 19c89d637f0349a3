use std::fmt;

use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[cfg(feature = "failpoints")]
use crate::failpoints::{SUBMIT_BULK__BEFORE_COMMIT, SUBMIT_BULK__BEFORE_SEND, indexer_fail_point};

use crate::batch::{Batch, BatchAccumulator};
use crate::broker::Broker;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::concurrency::signal::ClosedTx;
use crate::error::{IndexerError, IndexerResult};
use crate::extract::IdentifierExtractor;
use crate::gateway::IndexGateway;
use crate::metrics::{
    CHANGEFEED_COMMIT_FAILURES_TOTAL, CHANGEFEED_COMMITS_TOTAL, CHANGEFEED_MESSAGES_RECEIVED_TOTAL,
    CHANGEFEED_REWINDS_TOTAL, ERROR_KIND_LABEL, TOPIC_LABEL,
};
use crate::pipeline::PipelineSettings;
use crate::store::IndexStore;
use crate::store::bulk::{BulkItemOutcome, BulkResponse};
use crate::types::BrokerMessage;
use crate::workers::policy::build_error_handling_policy;

/// Maximum number of rejected documents described in the log of a partially failed bulk.
const MAX_LOGGED_ITEM_FAILURES: usize = 5;

/// Phase of the consume-commit loop.
///
/// A cycle moves through `Polling`, `Accumulating`, `Submitting` and `Committing`. Once shutdown
/// is requested or a fatal error occurs the loop moves to `ShuttingDown` and finally to `Closed`,
/// which it never leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Making sure the index exists and subscribing to the topic.
    Starting,
    Polling,
    Accumulating,
    Submitting,
    Committing,
    ShuttingDown,
    Closed,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Starting => "starting",
            LoopState::Polling => "polling",
            LoopState::Accumulating => "accumulating",
            LoopState::Submitting => "submitting",
            LoopState::Committing => "committing",
            LoopState::ShuttingDown => "shutting_down",
            LoopState::Closed => "closed",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a cycle that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// The bulk request completed and the offsets of the cycle were committed.
    Completed,
    /// No message of the cycle produced a document, nothing was submitted or committed.
    Empty,
    /// The cycle was abandoned without committing and the broker was rewound.
    Rewound,
}

/// Single-threaded loop moving messages from a broker topic into a search index.
///
/// Offsets are committed only after the bulk request covering every message of the cycle
/// completed, so each message is indexed at least once. Recoverable failures abandon the cycle
/// and rewind the broker to the last commit, the next poll redelivers the same messages.
pub struct ConsumeCommitLoop<B, S> {
    settings: PipelineSettings,
    broker: B,
    gateway: IndexGateway<S>,
    accumulator: BatchAccumulator,
    shutdown_rx: ShutdownRx,
    closed_tx: ClosedTx,
    state_tx: watch::Sender<LoopState>,
}

impl<B, S> ConsumeCommitLoop<B, S>
where
    B: Broker,
    S: IndexStore,
{
    pub fn new(
        settings: PipelineSettings,
        broker: B,
        store: S,
        shutdown_rx: ShutdownRx,
        closed_tx: ClosedTx,
        state_tx: watch::Sender<LoopState>,
    ) -> Self {
        let accumulator = BatchAccumulator::new(
            settings.index.clone(),
            IdentifierExtractor::new(&settings.id_strategy),
        );

        Self {
            settings,
            broker,
            gateway: IndexGateway::new(store),
            accumulator,
            shutdown_rx,
            closed_tx,
            state_tx,
        }
    }

    /// Runs cycles until shutdown is requested or a fatal error occurs.
    ///
    /// Both clients are released on every exit path before the loop reports itself closed. A
    /// fatal error is returned after the release, failures while releasing are only logged.
    pub async fn run(mut self) -> IndexerResult<()> {
        let result = self.run_cycles().await;

        match &result {
            Ok(()) => info!(topic = %self.settings.topic, "consume-commit loop stopped on request"),
            Err(err) => {
                let policy = build_error_handling_policy(err);
                error!(
                    topic = %self.settings.topic,
                    index = %self.settings.index,
                    error = %err,
                    solution = policy.solution(),
                    "consume-commit loop failed"
                );
            }
        }

        self.set_state(LoopState::ShuttingDown);
        if let Err(err) = self.close_clients().await {
            warn!(error = %err, "clients were not released cleanly");
        }
        self.set_state(LoopState::Closed);
        self.closed_tx.notify_closed();

        result
    }

    async fn run_cycles(&mut self) -> IndexerResult<()> {
        self.set_state(LoopState::Starting);
        self.gateway.ensure_index(&self.settings.index).await?;
        self.broker.subscribe(&self.settings.topic).await?;

        info!(
            topic = %self.settings.topic,
            index = %self.settings.index,
            broker = B::name(),
            store = S::name(),
            "consume-commit loop started"
        );

        loop {
            self.set_state(LoopState::Polling);
            let messages = match self.poll().await? {
                ShutdownResult::Ok(messages) => messages,
                ShutdownResult::Shutdown(()) => {
                    info!("shutdown requested while polling");
                    return Ok(());
                }
            };

            if messages.is_empty() {
                debug!("poll returned no messages");
                continue;
            }

            if self.run_cycle(&messages).await? != CycleOutcome::Completed {
                continue;
            }

            if let ShutdownResult::Shutdown(()) = self.pace().await {
                info!("shutdown requested while pacing");
                return Ok(());
            }
        }
    }

    /// Polls the broker unless shutdown is requested first, in which case the poll is dropped.
    async fn poll(&mut self) -> IndexerResult<ShutdownResult<Vec<BrokerMessage>, ()>> {
        tokio::select! {
            biased;

            _ = self.shutdown_rx.wait() => Ok(ShutdownResult::Shutdown(())),
            messages = self.broker.poll(self.settings.poll_timeout) => {
                Ok(ShutdownResult::Ok(messages?))
            }
        }
    }

    async fn run_cycle(&mut self, messages: &[BrokerMessage]) -> IndexerResult<CycleOutcome> {
        counter!(CHANGEFEED_MESSAGES_RECEIVED_TOTAL, TOPIC_LABEL => self.settings.topic.clone())
            .increment(messages.len() as u64);

        self.set_state(LoopState::Accumulating);
        let batch = self.accumulator.accumulate(messages);

        self.set_state(LoopState::Submitting);
        if batch.is_empty() {
            // Offsets of the skipped messages are committed with the next non-empty cycle.
            debug!(
                skipped = batch.skipped(),
                "no indexable documents in the polled messages, skipping the bulk request"
            );
            return Ok(CycleOutcome::Empty);
        }

        let response = match self.submit(&batch).await {
            Ok(response) => response,
            Err(err) => return self.abandon_cycle(err, &batch).await,
        };
        log_item_failures(&response);

        #[cfg(feature = "failpoints")]
        if let Err(err) = indexer_fail_point(SUBMIT_BULK__BEFORE_COMMIT) {
            return self.abandon_cycle(err, &batch).await;
        }

        self.set_state(LoopState::Committing);
        if let Err(err) = self.broker.commit().await {
            counter!(
                CHANGEFEED_COMMIT_FAILURES_TOTAL,
                TOPIC_LABEL => self.settings.topic.clone(),
                ERROR_KIND_LABEL => format!("{:?}", err.kind())
            )
            .increment(1);

            return self.abandon_cycle(err, &batch).await;
        }

        counter!(CHANGEFEED_COMMITS_TOTAL, TOPIC_LABEL => self.settings.topic.clone()).increment(1);
        info!(
            consumed = batch.consumed(),
            indexed = batch.len(),
            skipped = batch.skipped(),
            "committed offsets of the cycle"
        );

        Ok(CycleOutcome::Completed)
    }

    async fn submit(&self, batch: &Batch) -> IndexerResult<BulkResponse> {
        #[cfg(feature = "failpoints")]
        indexer_fail_point(SUBMIT_BULK__BEFORE_SEND)?;

        self.gateway.submit_bulk(&self.settings.index, batch).await
    }

    /// Drops the cycle without committing when `err` is recoverable, otherwise returns it.
    async fn abandon_cycle(&mut self, err: IndexerError, batch: &Batch) -> IndexerResult<CycleOutcome> {
        let policy = build_error_handling_policy(&err);
        if !policy.is_recoverable() {
            return Err(err);
        }

        warn!(
            error = %err,
            solution = policy.solution(),
            consumed = batch.consumed(),
            "abandoning the cycle without committing, uncommitted messages will be redelivered"
        );

        self.broker.rewind().await?;
        counter!(CHANGEFEED_REWINDS_TOTAL, TOPIC_LABEL => self.settings.topic.clone()).increment(1);

        Ok(CycleOutcome::Rewound)
    }

    /// Waits the pacing delay between two cycles, returning early on shutdown.
    async fn pace(&mut self) -> ShutdownResult<(), ()> {
        if self.settings.pacing.is_zero() {
            return ShutdownResult::Ok(());
        }

        tokio::select! {
            biased;

            _ = self.shutdown_rx.wait() => ShutdownResult::Shutdown(()),
            _ = tokio::time::sleep(self.settings.pacing) => ShutdownResult::Ok(()),
        }
    }

    /// Closes the broker and then the store, attempting both even if the first fails.
    async fn close_clients(&mut self) -> IndexerResult<()> {
        let mut errors = Vec::new();

        if let Err(err) = self.broker.close().await {
            error!(broker = B::name(), error = %err, "failed to close the broker client");
            errors.push(err);
        }
        if let Err(err) = self.gateway.close().await {
            error!(store = S::name(), error = %err, "failed to close the store client");
            errors.push(err);
        }

        if errors.is_empty() {
            info!("broker and store clients closed");
            return Ok(());
        }

        Err(errors.into())
    }

    fn set_state(&self, state: LoopState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "consume-commit loop state changed");
        }
    }
}

/// Logs documents the store rejected. The cycle still commits, they are not redelivered.
fn log_item_failures(response: &BulkResponse) {
    if !response.has_failures() {
        return;
    }

    let first_failures: Vec<String> = response
        .failed_items()
        .take(MAX_LOGGED_ITEM_FAILURES)
        .map(|item| match &item.outcome {
            BulkItemOutcome::Failed { error_type, reason } => {
                format!("{} ({}): {error_type}: {reason}", item.id, item.status)
            }
            BulkItemOutcome::Indexed { result } => format!("{} ({}): {result}", item.id, item.status),
        })
        .collect();

    warn!(
        rejected = response.failures(),
        indexed = response.successes(),
        first_failures = ?first_failures,
        "store rejected documents of the bulk request"
    );
}
