use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::IndexerResult;
use crate::store::base::{CreateIndexOutcome, IndexStore};
use crate::store::bulk::{BulkItem, BulkItemOutcome, BulkResponse};
use crate::types::{DocumentId, IndexOp};

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<String, BTreeMap<DocumentId, Value>>,
    bulk_calls: usize,
    closed: bool,
}

/// In-memory store for tests and local runs.
///
/// Documents are kept per index and keyed by identifier, so re-indexing overwrites like the real
/// store does. Indexing into a missing index creates it.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndexStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the documents of `index` ordered by identifier.
    pub async fn documents(&self, index: &str) -> Vec<(DocumentId, Value)> {
        let inner = self.inner.lock().await;
        inner
            .indices
            .get(index)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, document)| (id.clone(), document.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn document(&self, index: &str, id: &DocumentId) -> Option<Value> {
        let inner = self.inner.lock().await;
        inner
            .indices
            .get(index)
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    pub async fn has_index(&self, index: &str) -> bool {
        self.inner.lock().await.indices.contains_key(index)
    }

    /// Number of bulk requests received, including empty ones.
    pub async fn bulk_calls(&self) -> usize {
        self.inner.lock().await.bulk_calls
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

impl IndexStore for MemoryIndexStore {
    fn name() -> &'static str {
        "memory"
    }

    async fn index_exists(&self, index: &str) -> IndexerResult<bool> {
        Ok(self.has_index(index).await)
    }

    async fn create_index(&self, index: &str) -> IndexerResult<CreateIndexOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.indices.contains_key(index) {
            return Ok(CreateIndexOutcome::AlreadyExists);
        }

        info!(index, "creating in-memory index");
        inner.indices.insert(index.to_owned(), BTreeMap::new());

        Ok(CreateIndexOutcome::Created)
    }

    async fn bulk(&self, ops: &[IndexOp]) -> IndexerResult<BulkResponse> {
        let mut inner = self.inner.lock().await;
        inner.bulk_calls += 1;

        info!("writing a bulk of {} documents", ops.len());

        let items = ops
            .iter()
            .map(|op| {
                let documents = inner.indices.entry(op.index.clone()).or_default();
                let replaced = documents.insert(op.id.clone(), op.document.clone());

                let (status, result) = match replaced {
                    Some(_) => (200, "updated"),
                    None => (201, "created"),
                };

                BulkItem {
                    id: op.id.clone(),
                    status,
                    outcome: BulkItemOutcome::Indexed {
                        result: result.to_owned(),
                    },
                }
            })
            .collect();

        Ok(BulkResponse::new(items))
    }

    async fn close(&self) -> IndexerResult<()> {
        self.inner.lock().await.closed = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn op(id: &str, title: &str) -> IndexOp {
        IndexOp {
            index: "wikimedia".to_owned(),
            id: DocumentId::from(id),
            document: json!({"meta": {"id": id}, "title": title}),
        }
    }

    #[tokio::test]
    async fn reindexing_overwrites_instead_of_duplicating() {
        let store = MemoryIndexStore::new();

        let first = store.bulk(&[op("a", "one")]).await.unwrap();
        let second = store.bulk(&[op("a", "two")]).await.unwrap();

        assert_eq!(first.items()[0].status, 201);
        assert_eq!(second.items()[0].status, 200);

        let documents = store.documents("wikimedia").await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].1["title"], json!("two"));
    }

    #[tokio::test]
    async fn create_index_is_idempotent() {
        let store = MemoryIndexStore::new();

        assert!(!store.index_exists("wikimedia").await.unwrap());
        assert_eq!(
            store.create_index("wikimedia").await.unwrap(),
            CreateIndexOutcome::Created
        );
        assert_eq!(
            store.create_index("wikimedia").await.unwrap(),
            CreateIndexOutcome::AlreadyExists
        );
        assert!(store.index_exists("wikimedia").await.unwrap());
    }
}
