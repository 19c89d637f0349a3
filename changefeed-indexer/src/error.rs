use std::backtrace::Backtrace;
use std::error::Error;
use std::io;

use changefeed::error::IndexerError;
use thiserror::Error;

/// Result type for indexer service operations.
pub type IndexerServiceResult<T> = Result<T, IndexerServiceError>;

/// Error type of the indexer service.
///
/// Pipeline failures keep their [`IndexerError`] so that reporting can use its kind and backtrace.
#[derive(Debug, Error)]
pub enum IndexerServiceError {
    #[error("configuration error: {0}")]
    Config(#[source] Box<dyn Error + Send + Sync>),

    #[error(transparent)]
    Pipeline(#[from] IndexerError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

impl IndexerServiceError {
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        IndexerServiceError::Config(Box::new(err))
    }

    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            IndexerServiceError::Config(_) => "configuration error",
            IndexerServiceError::Pipeline(_) => "pipeline error",
            IndexerServiceError::Io(_) => "i/o error",
            IndexerServiceError::Service(_) => "indexer error",
        }
    }

    /// Returns the pipeline error this error wraps, if any.
    pub fn as_indexer_error(&self) -> Option<&IndexerError> {
        match self {
            IndexerServiceError::Pipeline(err) => Some(err),
            IndexerServiceError::Service(err) => err.downcast_ref::<IndexerError>(),
            _ => None,
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        let err = self.as_indexer_error()?;
        match err.errors() {
            Some(errors) => errors.iter().find_map(|err| err.backtrace()),
            None => err.backtrace(),
        }
    }
}
