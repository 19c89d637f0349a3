use changefeed_config::load_config;
use changefeed_config::shared::ProducerConfig;

use crate::error::{ProducerError, ProducerResult};

/// Loads the producer configuration from `./configuration` and validates it.
pub fn load_producer_config() -> ProducerResult<ProducerConfig> {
    let config = load_config::<ProducerConfig>().map_err(ProducerError::config)?;
    config.validate().map_err(ProducerError::config)?;

    Ok(config)
}
