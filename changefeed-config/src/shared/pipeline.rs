use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How the indexer derives a document identifier from a consumed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdStrategy {
    /// Reads a scalar at a dot separated path of the JSON payload.
    PayloadField {
        #[serde(default = "default_id_path")]
        path: String,
    },
    /// Uses `{topic}-{partition}-{offset}` of the message.
    Coordinates,
}

impl IdStrategy {
    pub const DEFAULT_PATH: &'static str = "meta.id";

    fn validate(&self) -> Result<(), ValidationError> {
        if let IdStrategy::PayloadField { path } = self
            && (path.is_empty() || path.split('.').any(str::is_empty))
        {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.id_strategy.path",
                constraint: format!("`{path}` must be a non-empty dot separated path"),
            });
        }

        Ok(())
    }
}

impl Default for IdStrategy {
    fn default() -> Self {
        IdStrategy::PayloadField {
            path: default_id_path(),
        }
    }
}

/// Tuning of the consume-commit loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Upper bound of a single poll wait.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Maximum number of messages returned by one poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    /// Pause after every committed batch. Zero disables it.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default)]
    pub id_strategy: IdStrategy,
}

impl PipelineConfig {
    pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 3000;
    pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;
    pub const DEFAULT_PACING_MS: u64 = 1000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.poll_timeout_ms",
                constraint: "must be greater than 0".to_owned(),
            });
        }
        if self.max_poll_records == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.max_poll_records",
                constraint: "must be greater than 0".to_owned(),
            });
        }

        self.id_strategy.validate()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            max_poll_records: default_max_poll_records(),
            pacing_ms: default_pacing_ms(),
            id_strategy: IdStrategy::default(),
        }
    }
}

fn default_id_path() -> String {
    IdStrategy::DEFAULT_PATH.to_owned()
}

fn default_poll_timeout_ms() -> u64 {
    PipelineConfig::DEFAULT_POLL_TIMEOUT_MS
}

fn default_max_poll_records() -> usize {
    PipelineConfig::DEFAULT_MAX_POLL_RECORDS
}

fn default_pacing_ms() -> u64 {
    PipelineConfig::DEFAULT_PACING_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_timeout_ms, 3000);
        assert_eq!(config.max_poll_records, 500);
        assert_eq!(config.pacing_ms, 1000);
        assert_eq!(
            config.id_strategy,
            IdStrategy::PayloadField {
                path: "meta.id".to_owned()
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_coordinates_strategy() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"id_strategy": {"type": "coordinates"}}"#).unwrap();
        assert_eq!(config.id_strategy, IdStrategy::Coordinates);
    }

    #[test]
    fn rejects_paths_with_empty_segments() {
        let config = PipelineConfig {
            id_strategy: IdStrategy::PayloadField {
                path: "meta..id".to_owned(),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field: "pipeline.id_strategy.path", .. })
        ));
    }

    #[test]
    fn rejects_zero_poll_timeout() {
        let config = PipelineConfig {
            poll_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
