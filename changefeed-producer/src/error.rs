use std::error::Error;
use std::io;

use rdkafka::error::KafkaError;
use reqwest::StatusCode;
use thiserror::Error;

pub type ProducerResult<T> = Result<T, ProducerError>;

/// Error type of the producer service.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("configuration error: {0}")]
    Config(#[source] Box<dyn Error + Send + Sync>),

    #[error("feed request failed: {0}")]
    Feed(#[from] reqwest::Error),

    #[error("feed answered with status {0}")]
    FeedStatus(StatusCode),

    #[error("failed to publish to kafka: {0}")]
    Publish(#[from] KafkaError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ProducerError {
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ProducerError::Config(Box::new(err))
    }
}
