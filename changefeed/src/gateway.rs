use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::batch::Batch;
use crate::error::IndexerResult;
use crate::metrics::{
    CHANGEFEED_BULK_DURATION_SECONDS, CHANGEFEED_BULK_FAILURES_TOTAL,
    CHANGEFEED_DOCUMENTS_INDEXED_TOTAL, CHANGEFEED_DOCUMENTS_REJECTED_TOTAL, ERROR_KIND_LABEL,
    INDEX_LABEL,
};
use crate::store::bulk::BulkResponse;
use crate::store::{CreateIndexOutcome, IndexStore};

/// Entry point of the consume-commit loop into the document store.
#[derive(Debug, Clone)]
pub struct IndexGateway<S> {
    store: S,
}

impl<S> IndexGateway<S>
where
    S: IndexStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Makes sure `index` exists, creating it when absent.
    ///
    /// Losing a creation race to another client counts as success.
    pub async fn ensure_index(&self, index: &str) -> IndexerResult<()> {
        if self.store.index_exists(index).await? {
            debug!(index, store = S::name(), "index already exists");
            return Ok(());
        }

        match self.store.create_index(index).await? {
            CreateIndexOutcome::Created => {
                info!(index, store = S::name(), "created index");
            }
            CreateIndexOutcome::AlreadyExists => {
                info!(index, store = S::name(), "index was created concurrently");
            }
        }

        Ok(())
    }

    /// Submits every operation of `batch` in one bulk request.
    pub async fn submit_bulk(&self, index: &str, batch: &Batch) -> IndexerResult<BulkResponse> {
        let started = Instant::now();
        let result = self.store.bulk(batch.ops()).await;
        histogram!(CHANGEFEED_BULK_DURATION_SECONDS, INDEX_LABEL => index.to_owned())
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(response) => {
                counter!(CHANGEFEED_DOCUMENTS_INDEXED_TOTAL, INDEX_LABEL => index.to_owned())
                    .increment(response.successes() as u64);
                if response.has_failures() {
                    counter!(CHANGEFEED_DOCUMENTS_REJECTED_TOTAL, INDEX_LABEL => index.to_owned())
                        .increment(response.failures() as u64);
                }
            }
            Err(err) => {
                counter!(
                    CHANGEFEED_BULK_FAILURES_TOTAL,
                    INDEX_LABEL => index.to_owned(),
                    ERROR_KIND_LABEL => format!("{:?}", err.kind())
                )
                .increment(1);
            }
        }

        result
    }

    pub async fn close(&self) -> IndexerResult<()> {
        self.store.close().await
    }
}
