//! Producer service binary.
//!
//! Reads the Wikimedia recent changes server-sent event stream for a bounded session and
//! publishes every event as a Kafka message, so that the indexer has something to consume.

use changefeed_config::shared::ProducerConfig;
use changefeed_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_producer_config;
use crate::core::start_producer_with_config;
use crate::error::{ProducerError, ProducerResult};

mod config;
mod core;
mod error;
mod metrics;
mod publisher;
mod sse;

fn main() -> ProducerResult<()> {
    let config = load_producer_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ProducerError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: ProducerConfig) -> ProducerResult<()> {
    if let Err(err) = start_producer_with_config(config).await {
        error!("{err}");

        return Err(err);
    }

    Ok(())
}
