use serde::Deserialize;

use crate::Config;
use crate::shared::{BrokerConfig, FeedConfig, ValidationError};

/// Complete configuration of the producer service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.broker.validate()?;
        self.feed.validate()
    }
}

impl Config for ProducerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
