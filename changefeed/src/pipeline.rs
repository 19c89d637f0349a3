use std::time::Duration;

use changefeed_config::shared::{IdStrategy, IndexerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bail;
use crate::broker::Broker;
use crate::concurrency::shutdown::{ShutdownHandle, ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::{ClosedRx, ClosedTx, create_closed_signal};
use crate::error::{ErrorKind, IndexerResult};
use crate::store::IndexStore;
use crate::workers::consume::{ConsumeCommitLoop, LoopState};

/// Parameters of a consume-commit loop.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub topic: String,
    pub index: String,
    pub poll_timeout: Duration,
    /// Pause after every committed cycle, zero disables it.
    pub pacing: Duration,
    pub id_strategy: IdStrategy,
}

impl PipelineSettings {
    /// Default upper bound of a poll wait.
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Settings with the default poll timeout, no pacing and identifiers read from `meta.id`.
    pub fn new(topic: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            index: index.into(),
            poll_timeout: Self::DEFAULT_POLL_TIMEOUT,
            pacing: Duration::ZERO,
            id_strategy: IdStrategy::default(),
        }
    }

    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            topic: config.broker.topic.clone(),
            index: config.store.index_name.clone(),
            poll_timeout: Duration::from_millis(config.pipeline.poll_timeout_ms),
            pacing: Duration::from_millis(config.pipeline.pacing_ms),
            id_strategy: config.pipeline.id_strategy.clone(),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_id_strategy(mut self, id_strategy: IdStrategy) -> Self {
        self.id_strategy = id_strategy;
        self
    }
}

#[derive(Debug)]
enum PipelineState<B, S> {
    NotStarted {
        broker: B,
        store: S,
        closed_tx: ClosedTx,
    },
    Started {
        handle: JoinHandle<IndexerResult<()>>,
    },
}

/// Runs a [`ConsumeCommitLoop`] on its own task and controls its lifecycle.
#[derive(Debug)]
pub struct Pipeline<B, S> {
    settings: PipelineSettings,
    state: Option<PipelineState<B, S>>,
    shutdown_tx: ShutdownTx,
    closed_rx: ClosedRx,
    state_tx: watch::Sender<LoopState>,
}

impl<B, S> Pipeline<B, S>
where
    B: Broker + Send + Sync + 'static,
    S: IndexStore + Send + Sync + 'static,
{
    pub fn new(settings: PipelineSettings, broker: B, store: S) -> Self {
        // The receiver is not kept, the loop subscribes through the sender when it starts.
        let (shutdown_tx, _) = create_shutdown_channel();
        let (closed_tx, closed_rx) = create_closed_signal();
        let (state_tx, _) = watch::channel(LoopState::Starting);

        Self {
            settings,
            state: Some(PipelineState::NotStarted {
                broker,
                store,
                closed_tx,
            }),
            shutdown_tx,
            closed_rx,
            state_tx,
        }
    }

    /// Returns a handle that stops the loop and waits until it released its clients.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown_tx.clone(), self.closed_rx.clone())
    }

    /// Returns a receiver observing the phase of the loop.
    pub fn state_rx(&self) -> watch::Receiver<LoopState> {
        self.state_tx.subscribe()
    }

    /// Spawns the consume-commit loop.
    pub async fn start(&mut self) -> IndexerResult<()> {
        if !matches!(self.state, Some(PipelineState::NotStarted { .. })) {
            bail!(ErrorKind::InvalidState, "Pipeline was already started");
        }

        let Some(PipelineState::NotStarted {
            broker,
            store,
            closed_tx,
        }) = self.state.take()
        else {
            bail!(ErrorKind::InvalidState, "Pipeline was already started");
        };

        info!(
            topic = %self.settings.topic,
            index = %self.settings.index,
            poll_timeout_ms = self.settings.poll_timeout.as_millis() as u64,
            pacing_ms = self.settings.pacing.as_millis() as u64,
            "starting pipeline"
        );

        let consume_loop = ConsumeCommitLoop::new(
            self.settings.clone(),
            broker,
            store,
            self.shutdown_tx.subscribe(),
            closed_tx,
            self.state_tx.clone(),
        );
        let handle = tokio::spawn(consume_loop.run());
        self.state = Some(PipelineState::Started { handle });

        Ok(())
    }

    /// Waits for the loop to finish, returning the fatal error that stopped it if any.
    pub async fn wait(self) -> IndexerResult<()> {
        let Some(PipelineState::Started { handle }) = self.state else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        info!("waiting for the consume-commit loop to complete");

        handle.await?
    }

    pub fn shutdown(&self) {
        info!("trying to shut down the pipeline");

        if !self.shutdown_tx.shutdown() {
            info!("shutdown of the pipeline was already requested");
            return;
        }

        info!("shut down signal successfully sent to the consume-commit loop");
    }

    pub async fn shutdown_and_wait(self) -> IndexerResult<()> {
        self.shutdown();
        self.wait().await
    }
}
