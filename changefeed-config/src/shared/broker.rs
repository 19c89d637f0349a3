use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Where a consumer group without a committed offset starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoOffsetReset {
    Earliest,
    #[default]
    Latest,
}

impl AutoOffsetReset {
    /// Value of the `auto.offset.reset` client property.
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}

/// Connection settings for the Kafka cluster.
///
/// `client_properties` is passed through verbatim to the client, which is how security
/// settings (`security.protocol`, `sasl.*`, ...) are supplied. Since those may carry
/// credentials the type does not implement [`Serialize`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    /// Comma separated `host:port` list.
    pub bootstrap_servers: String,
    /// Topic the producer writes to and the indexer reads from.
    pub topic: String,
    /// Consumer group used by the indexer.
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default)]
    pub auto_offset_reset: AutoOffsetReset,
    #[serde(default)]
    pub client_properties: BTreeMap<String, String>,
}

impl BrokerConfig {
    pub const DEFAULT_GROUP_ID: &'static str = "changefeed-indexer";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ValidationError::EmptyField("broker.bootstrap_servers"));
        }
        if self.topic.trim().is_empty() {
            return Err(ValidationError::EmptyField("broker.topic"));
        }
        if self.group_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("broker.group_id"));
        }

        Ok(())
    }

    /// Names of the pass-through properties, for logging without their values.
    pub fn client_property_keys(&self) -> Vec<String> {
        self.client_properties.keys().cloned().collect()
    }
}

fn default_group_id() -> String {
    BrokerConfig::DEFAULT_GROUP_ID.to_owned()
}
