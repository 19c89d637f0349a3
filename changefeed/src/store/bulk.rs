//! Bulk request encoding and bulk response decoding for the search store REST API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, IndexerResult};
use crate::indexer_error;
use crate::types::{DocumentId, IndexOp};

/// Outcome of a single operation of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkItemOutcome {
    /// The document was written, `result` is `created` or `updated`.
    Indexed { result: String },
    Failed { error_type: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub id: DocumentId,
    pub status: u16,
    pub outcome: BulkItemOutcome,
}

impl BulkItem {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BulkItemOutcome::Indexed { .. })
    }
}

/// Per-item outcomes of a bulk request, in the order of the submitted operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    took_ms: Option<u64>,
    items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn new(items: Vec<BulkItem>) -> Self {
        Self {
            took_ms: None,
            items,
        }
    }

    /// Time the store reported for the request, when it did.
    pub fn took_ms(&self) -> Option<u64> {
        self.took_ms
    }

    pub fn items(&self) -> &[BulkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn successes(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.items.len() - self.successes()
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| !item.is_success())
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().filter(|item| !item.is_success())
    }

    /// Decodes the JSON body returned by the `_bulk` endpoint.
    pub fn from_slice(body: &[u8]) -> IndexerResult<Self> {
        let raw: RawBulkResponse = serde_json::from_slice(body).map_err(|err| {
            indexer_error!(
                ErrorKind::StoreResponseInvalid,
                "Bulk response could not be decoded",
                err.to_string(),
                source: err
            )
        })?;

        let items = raw
            .items
            .into_iter()
            .enumerate()
            .map(|(position, actions)| {
                let Some((_, item)) = actions.into_iter().next() else {
                    return Err(indexer_error!(
                        ErrorKind::StoreResponseInvalid,
                        "Bulk response item has no action",
                        format!("item {position} is empty")
                    ));
                };

                Ok(item.into_bulk_item())
            })
            .collect::<IndexerResult<Vec<_>>>()?;

        Ok(Self {
            took_ms: raw.took,
            items,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    took: Option<u64>,
    items: Vec<BTreeMap<String, RawBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RawItemError>,
}

#[derive(Debug, Deserialize)]
struct RawItemError {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    reason: String,
}

impl RawBulkItem {
    fn into_bulk_item(self) -> BulkItem {
        let outcome = match self.error {
            Some(error) => BulkItemOutcome::Failed {
                error_type: error.error_type,
                reason: error.reason,
            },
            None if !(200..300).contains(&self.status) => BulkItemOutcome::Failed {
                error_type: "unknown".to_owned(),
                reason: format!("status {}", self.status),
            },
            None => BulkItemOutcome::Indexed {
                result: self.result.unwrap_or_default(),
            },
        };

        BulkItem {
            id: DocumentId::new(self.id.unwrap_or_default()),
            status: self.status,
            outcome,
        }
    }
}

#[derive(Serialize)]
struct ActionLine<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Encodes `ops` as an NDJSON bulk body: one `index` action line with an explicit `_id`
/// followed by the document line, each terminated by a newline.
pub fn encode_bulk_body(ops: &[IndexOp]) -> IndexerResult<Vec<u8>> {
    let mut body = Vec::new();
    for op in ops {
        let action = ActionLine {
            index: ActionMeta {
                index: &op.index,
                id: op.id.as_str(),
            },
        };

        serde_json::to_writer(&mut body, &action)?;
        body.push(b'\n');
        serde_json::to_writer(&mut body, &op.document)?;
        body.push(b'\n');
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn encodes_action_and_document_lines() {
        let ops = vec![
            IndexOp {
                index: "wikimedia".to_owned(),
                id: DocumentId::from("a"),
                document: json!({"meta": {"id": "a"}, "title": "One"}),
            },
            IndexOp {
                index: "wikimedia".to_owned(),
                id: DocumentId::from("b"),
                document: json!({"meta": {"id": "b"}}),
            },
        ];

        let body = String::from_utf8(encode_bulk_body(&ops).unwrap()).unwrap();
        let lines: Vec<&str> = body.split_terminator('\n').collect();

        assert!(body.ends_with('\n'));
        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action, json!({"index": {"_index": "wikimedia", "_id": "a"}}));
        let document: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(document["title"], json!("One"));
        let action: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(action["index"]["_id"], json!("b"));
    }

    #[test]
    fn decodes_mixed_item_outcomes() {
        let body = json!({
            "took": 12,
            "errors": true,
            "items": [
                {"index": {"_index": "wikimedia", "_id": "a", "status": 201, "result": "created"}},
                {"index": {"_index": "wikimedia", "_id": "b", "status": 200, "result": "updated"}},
                {"index": {"_index": "wikimedia", "_id": "c", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [timestamp]"
                }}}
            ]
        });

        let response = BulkResponse::from_slice(body.to_string().as_bytes()).unwrap();

        assert_eq!(response.took_ms(), Some(12));
        assert_eq!(response.len(), 3);
        assert_eq!(response.successes(), 2);
        assert_eq!(response.failures(), 1);
        assert!(response.has_failures());

        let failed: Vec<_> = response.failed_items().collect();
        assert_eq!(failed[0].id, DocumentId::from("c"));
        assert_eq!(failed[0].status, 400);
        assert_eq!(
            failed[0].outcome,
            BulkItemOutcome::Failed {
                error_type: "mapper_parsing_exception".to_owned(),
                reason: "failed to parse field [timestamp]".to_owned(),
            }
        );
        assert_eq!(
            response.items()[0].outcome,
            BulkItemOutcome::Indexed {
                result: "created".to_owned()
            }
        );
    }

    #[test]
    fn undecodable_body_is_an_invalid_response() {
        let err = BulkResponse::from_slice(b"<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreResponseInvalid);

        let err = BulkResponse::from_slice(br#"{"items": [{}]}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreResponseInvalid);
    }
}
