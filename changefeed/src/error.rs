//! Error types and result definitions for the indexing pipeline.
//!
//! [`IndexerError`] carries an [`ErrorKind`] classification, a static description, optional
//! dynamic detail and source, and the callsite location with a captured backtrace. Several errors
//! can be aggregated into one, which is how best effort shutdown reports every failed close.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use rdkafka::error::KafkaError;

/// Result type used across the crate.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Payload stored for single [`IndexerError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the indexing pipeline.
#[derive(Debug, Clone)]
pub struct IndexerError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, for example one per client that failed to close.
    Many {
        errors: Vec<IndexerError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised by the pipeline.
///
/// [`crate::workers::policy::build_error_handling_policy`] maps each kind to the way the consume-commit
/// loop reacts to it.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Payload Errors
    InvalidPayload,
    MissingField,

    // Store Errors
    StoreConnectionFailed,
    StoreRequestFailed,
    StoreResponseInvalid,
    StoreAuthenticationFailed,

    // Broker Errors
    BrokerConnectionFailed,
    BrokerSubscribeFailed,
    BrokerPollFailed,
    BrokerCommitFailed,
    BrokerSeekFailed,
    BrokerPublishFailed,
    BrokerError,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // State Errors
    InvalidState,

    Unknown,

    // Error kinds raised by fail points in tests.
    #[cfg(feature = "failpoints")]
    WithRecoverable,
    #[cfg(feature = "failpoints")]
    WithFatal,
}

impl IndexerError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`] if
    /// there is none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the aggregated errors, or `None` for a single error.
    pub fn errors(&self) -> Option<&[IndexerError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the static description, or `None` for aggregated errors.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the dynamic detail if available.
    ///
    /// For aggregated errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    ///
    /// Has no effect on aggregated errors since those forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        IndexerError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for IndexerError {
    fn eq(&self, other: &IndexerError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for IndexerError {
    /// Hashes only the kind and the static description so that occurrences of the same failure
    /// group together regardless of location or detail.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for IndexerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered = backtrace.to_string();
    if rendered.trim().is_empty() {
        return Ok(());
    }

    write!(f, "\n  Backtrace:")?;
    for line in rendered.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for IndexerError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> IndexerError {
        IndexerError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for IndexerError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> IndexerError {
        IndexerError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is instead of being wrapped.
impl<E> From<Vec<E>> for IndexerError
where
    E: Into<IndexerError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> IndexerError {
        let location = Location::caller();
        let mut errors: Vec<IndexerError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        IndexerError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for IndexerError {
    #[track_caller]
    fn from(err: std::io::Error) -> IndexerError {
        let detail = err.to_string();
        IndexerError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps JSON failures to [`ErrorKind::SerializationError`] or
/// [`ErrorKind::DeserializationError`] depending on their category.
impl From<serde_json::Error> for IndexerError {
    #[track_caller]
    fn from(err: serde_json::Error) -> IndexerError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::DeserializationError, "JSON deserialization failed")
            }
        };

        let detail = err.to_string();
        IndexerError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps HTTP client failures to store error kinds.
///
/// Connection problems and timeouts become [`ErrorKind::StoreConnectionFailed`], undecodable
/// bodies [`ErrorKind::StoreResponseInvalid`] and everything else
/// [`ErrorKind::StoreRequestFailed`].
impl From<reqwest::Error> for IndexerError {
    #[track_caller]
    fn from(err: reqwest::Error) -> IndexerError {
        let (kind, description) = if err.is_timeout() {
            (ErrorKind::StoreConnectionFailed, "Store request timed out")
        } else if err.is_connect() {
            (ErrorKind::StoreConnectionFailed, "Could not connect to the store")
        } else if err.is_decode() {
            (ErrorKind::StoreResponseInvalid, "Store response could not be decoded")
        } else {
            (ErrorKind::StoreRequestFailed, "Store request failed")
        };

        let detail = err.to_string();
        IndexerError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps Kafka client failures to broker error kinds based on the failed operation.
impl From<KafkaError> for IndexerError {
    #[track_caller]
    fn from(err: KafkaError) -> IndexerError {
        let (kind, description) = match &err {
            KafkaError::ClientCreation(_) | KafkaError::ClientConfig(..) => (
                ErrorKind::BrokerConnectionFailed,
                "Failed to create the Kafka client",
            ),
            KafkaError::Subscription(_) => (
                ErrorKind::BrokerSubscribeFailed,
                "Failed to subscribe to the Kafka topic",
            ),
            KafkaError::MessageConsumption(_) | KafkaError::PartitionEOF(_) => (
                ErrorKind::BrokerPollFailed,
                "Failed to consume from Kafka",
            ),
            KafkaError::ConsumerCommit(_) | KafkaError::StoreOffset(_) => (
                ErrorKind::BrokerCommitFailed,
                "Failed to commit Kafka offsets",
            ),
            KafkaError::Seek(_) => (
                ErrorKind::BrokerSeekFailed,
                "Failed to seek the Kafka consumer",
            ),
            KafkaError::MessageProduction(_) | KafkaError::Flush(_) => (
                ErrorKind::BrokerPublishFailed,
                "Failed to publish to Kafka",
            ),
            _ => (ErrorKind::BrokerError, "Kafka client operation failed"),
        };

        let detail = err.to_string();
        IndexerError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<tokio::task::JoinError> for IndexerError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> IndexerError {
        let detail = err.to_string();
        IndexerError::from_components(
            ErrorKind::InvalidState,
            Cow::Borrowed("Blocking task did not complete"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;
    use crate::indexer_error;

    #[test]
    fn single_error_renders_kind_description_and_detail() {
        let err = indexer_error!(ErrorKind::MissingField, "Field missing", "meta.id");

        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.description(), Some("Field missing"));
        assert_eq!(err.detail(), Some("meta.id"));

        let rendered = err.to_string();
        assert!(rendered.starts_with("[MissingField] Field missing @ "));
        assert!(rendered.contains("Detail:\n    meta.id"));
    }

    #[test]
    fn aggregation_of_one_error_returns_it_unchanged() {
        let err = IndexerError::from(vec![indexer_error!(
            ErrorKind::BrokerError,
            "Close failed"
        )]);

        assert_eq!(err.kind(), ErrorKind::BrokerError);
        assert_eq!(err.description(), Some("Close failed"));
    }

    #[test]
    fn aggregation_keeps_every_kind() {
        let err = IndexerError::from(vec![
            indexer_error!(ErrorKind::BrokerError, "Broker close failed"),
            indexer_error!(ErrorKind::StoreConnectionFailed, "Store close failed"),
        ]);

        assert_eq!(err.kind(), ErrorKind::BrokerError);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::BrokerError, ErrorKind::StoreConnectionFailed]
        );
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated"));
        assert!(err.source().is_some());
    }

    #[test]
    fn json_syntax_error_is_a_deserialization_error() {
        let json_err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err = IndexerError::from(json_err);

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.source().is_some());
    }

    #[test]
    fn source_is_preserved_across_clones() {
        let io = std::io::Error::other("disk on fire");
        let err = indexer_error!(ErrorKind::IoError, "Write failed", source: io);
        let cloned = err.clone();

        assert_eq!(
            cloned.source().map(|source| source.to_string()),
            Some("disk on fire".to_owned())
        );
        assert_eq!(err, cloned);
    }
}
