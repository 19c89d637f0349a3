use changefeed_config::load_config;
use changefeed_config::shared::IndexerConfig;

use crate::error::{IndexerServiceError, IndexerServiceResult};

/// Loads the indexer configuration from `./configuration` and validates it.
pub fn load_indexer_config() -> IndexerServiceResult<IndexerConfig> {
    let config = load_config::<IndexerConfig>().map_err(IndexerServiceError::config)?;
    config.validate().map_err(IndexerServiceError::config)?;

    Ok(config)
}
