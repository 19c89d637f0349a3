use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings of the upstream Server-Sent Events feed read by the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeedConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// How long a producer session lasts before it stops on its own.
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: u64,
    /// Pause before reconnecting after the stream dropped.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl FeedConfig {
    pub const DEFAULT_URL: &'static str = "https://stream.wikimedia.org/v2/stream/recentchange";
    pub const DEFAULT_SESSION_DURATION_SECS: u64 = 180;
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyField("feed.url"));
        }
        if self.session_duration_secs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "feed.session_duration_secs",
                constraint: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            session_duration_secs: default_session_duration_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_url() -> String {
    FeedConfig::DEFAULT_URL.to_owned()
}

fn default_session_duration_secs() -> u64 {
    FeedConfig::DEFAULT_SESSION_DURATION_SECS
}

fn default_reconnect_delay_ms() -> u64 {
    FeedConfig::DEFAULT_RECONNECT_DELAY_MS
}
