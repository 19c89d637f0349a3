use changefeed_config::shared::IdStrategy;
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};
use crate::types::{BrokerMessage, DocumentId};

/// A message turned into an indexable document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub id: DocumentId,
    /// Parsed payload, always a JSON object.
    pub document: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Strategy {
    PayloadField { path: String, segments: Vec<String> },
    Coordinates,
}

/// Derives document identifiers from broker messages.
///
/// Extraction is pure: the same message always yields the same identifier, which is what makes
/// re-indexing a redelivered message an overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierExtractor {
    strategy: Strategy,
}

impl IdentifierExtractor {
    pub fn new(strategy: &IdStrategy) -> Self {
        match strategy {
            IdStrategy::PayloadField { path } => Self::payload_field(path),
            IdStrategy::Coordinates => Self {
                strategy: Strategy::Coordinates,
            },
        }
    }

    /// Reads the identifier at a dot separated `path` of the payload.
    pub fn payload_field(path: &str) -> Self {
        Self {
            strategy: Strategy::PayloadField {
                path: path.to_owned(),
                segments: path.split('.').map(str::to_owned).collect(),
            },
        }
    }

    /// Parses the payload of `message` and derives its identifier.
    ///
    /// Fails with [`ErrorKind::InvalidPayload`] when the payload is absent, is not valid JSON or
    /// is not a JSON object, and with [`ErrorKind::MissingField`] when the configured path does
    /// not lead to a non-empty scalar.
    pub fn extract(&self, message: &BrokerMessage) -> IndexerResult<ExtractedDocument> {
        let document = parse_document(message.payload.as_deref())?;

        let id = match &self.strategy {
            Strategy::PayloadField { path, segments } => {
                extract_scalar(&document, path, segments)?
            }
            Strategy::Coordinates => DocumentId::new(message.coordinates()),
        };

        Ok(ExtractedDocument { id, document })
    }
}

fn parse_document(payload: Option<&[u8]>) -> IndexerResult<Value> {
    let Some(payload) = payload else {
        bail!(ErrorKind::InvalidPayload, "Message has no payload");
    };

    let document: Value = match serde_json::from_slice(payload) {
        Ok(document) => document,
        Err(err) => bail!(
            ErrorKind::InvalidPayload,
            "Payload is not valid JSON",
            err.to_string(),
            source: err
        ),
    };

    if !document.is_object() {
        bail!(
            ErrorKind::InvalidPayload,
            "Payload is not a JSON object",
            json_type_name(&document)
        );
    }

    Ok(document)
}

fn extract_scalar(document: &Value, path: &str, segments: &[String]) -> IndexerResult<DocumentId> {
    let value = segments
        .iter()
        .try_fold(document, |current, segment| current.get(segment.as_str()));

    let id = match value {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(other) => bail!(
            ErrorKind::MissingField,
            "Identifier field is not a scalar",
            format!("`{path}` holds a {}", json_type_name(other))
        ),
        None => bail!(
            ErrorKind::MissingField,
            "Identifier field is missing",
            format!("`{path}` is not present in the payload")
        ),
    };

    if id.is_empty() {
        bail!(
            ErrorKind::MissingField,
            "Identifier field is empty",
            format!("`{path}` is an empty string")
        );
    }

    Ok(DocumentId::new(id))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
