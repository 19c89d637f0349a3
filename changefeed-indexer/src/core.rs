use changefeed::broker::Broker;
use changefeed::broker::kafka::KafkaBroker;
use changefeed::pipeline::{Pipeline, PipelineSettings};
use changefeed::store::IndexStore;
use changefeed::store::opensearch::OpenSearchStore;
use changefeed_config::shared::{IndexerConfig, IndexerConfigWithoutSecrets};
use tracing::{debug, info, warn};

/// Starts the indexer with the provided configuration and runs it until it stops.
///
/// Builds the Kafka consumer and the search store client, then runs the pipeline until a
/// termination signal is received or it fails.
pub async fn start_indexer_with_config(config: IndexerConfig) -> anyhow::Result<()> {
    info!("starting indexer service");

    log_config(&config);

    let settings = PipelineSettings::from_config(&config);
    let broker = KafkaBroker::new(&config.broker, config.pipeline.max_poll_records)?;
    let store = OpenSearchStore::new(&config.store)?;

    let pipeline = Pipeline::new(settings, broker, store);
    start_pipeline(pipeline).await?;

    info!("indexer service completed");

    Ok(())
}

fn log_config(config: &IndexerConfig) {
    let without_secrets = IndexerConfigWithoutSecrets::from(config.clone());
    match serde_json::to_string(&without_secrets) {
        Ok(rendered) => debug!(config = %rendered, "indexer config"),
        Err(err) => warn!(error = %err, "failed to render the indexer config"),
    }
}

/// Runs `pipeline` and stops it gracefully on SIGINT or SIGTERM.
///
/// The signal task returns only after the loop confirmed it released both clients.
#[tracing::instrument(skip(pipeline))]
async fn start_pipeline<B, S>(mut pipeline: Pipeline<B, S>) -> anyhow::Result<()>
where
    B: Broker + Send + Sync + 'static,
    S: IndexStore + Send + Sync + 'static,
{
    pipeline.start().await?;

    let mut shutdown_handle = pipeline.shutdown_handle();
    let signal_task = tokio::spawn(async move {
        wait_for_termination_signal().await;
        shutdown_handle.shutdown_and_wait().await;

        info!("pipeline shut down after termination signal");
    });

    let result = pipeline.wait().await;

    // The pipeline may have stopped on its own, in which case no signal arrived.
    signal_task.abort();
    let _ = signal_task.await;

    result?;

    Ok(())
}

async fn wait_for_termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("sigint (ctrl+c) received, shutting down pipeline");
                    }
                    _ = sigterm.recv() => {
                        info!("sigterm received, shutting down pipeline");
                    }
                }

                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to register the sigterm handler, only sigint is handled");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("sigint (ctrl+c) received, shutting down pipeline"),
        Err(err) => {
            warn!(error = %err, "failed to listen for sigint, the pipeline only stops on failure");
            std::future::pending::<()>().await;
        }
    }
}
