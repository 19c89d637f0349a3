//! Indexer service binary.
//!
//! Consumes change events from a Kafka topic and indexes them into OpenSearch, committing
//! offsets only after the documents were written. Stops gracefully on SIGINT and SIGTERM.

use changefeed_config::shared::IndexerConfig;
use changefeed_telemetry::metrics::init_metrics;
use changefeed_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_indexer_config;
use crate::core::start_indexer_with_config;
use crate::error::{IndexerServiceError, IndexerServiceResult};

mod config;
mod core;
mod error;
mod sentry;

/// Environment variable holding the version of the deployed indexer.
const APP_VERSION_ENV_NAME: &str = "APP_VERSION";

/// Name under which the indexer reports metrics.
const SERVICE_NAME: &str = "changefeed-indexer";

fn main() -> IndexerServiceResult<()> {
    let config = load_indexer_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(IndexerServiceError::config)?;

    // Sentry is initialized before the runtime so that its panic integration covers every thread.
    let _sentry_guard = sentry::init(&config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))?;

    Ok(())
}

async fn async_main(config: IndexerConfig) -> IndexerServiceResult<()> {
    // The exporter's listener is spawned on the current runtime.
    if let Some(port) = config.metrics_port {
        init_metrics(SERVICE_NAME, port).map_err(IndexerServiceError::config)?;
    }

    if let Err(err) = start_indexer_with_config(config).await {
        let err = IndexerServiceError::from(err);
        sentry::capture_error(&err);
        error!(category = err.category(), "{err}");

        return Err(err);
    }

    Ok(())
}
