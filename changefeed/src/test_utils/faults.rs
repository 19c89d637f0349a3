use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::bail;
use crate::broker::Broker;
use crate::error::{ErrorKind, IndexerResult};
use crate::store::bulk::{BulkItem, BulkItemOutcome, BulkResponse};
use crate::store::{CreateIndexOutcome, IndexStore};
use crate::types::{BrokerMessage, DocumentId, IndexOp};

/// Error type reported for documents rejected by [`FaultInjectingStore::reject_documents`].
pub const REJECTED_DOCUMENT_ERROR_TYPE: &str = "mapper_parsing_exception";

#[derive(Debug, Default)]
struct StoreFaults {
    failing_bulks: usize,
    bulk_error_kind: Option<ErrorKind>,
    index_check_error_kind: Option<ErrorKind>,
    rejected_ids: HashSet<DocumentId>,
    fail_close: bool,
    bulk_attempts: usize,
}

/// Wraps an [`IndexStore`] and makes chosen calls fail.
///
/// Failed bulk requests never reach the wrapped store.
#[derive(Debug, Clone)]
pub struct FaultInjectingStore<S> {
    inner: S,
    faults: Arc<Mutex<StoreFaults>>,
}

impl<S> FaultInjectingStore<S> {
    pub fn wrap(store: S) -> Self {
        Self {
            inner: store,
            faults: Arc::new(Mutex::new(StoreFaults::default())),
        }
    }

    pub fn get_inner(&self) -> &S {
        &self.inner
    }

    /// Fails the next `count` bulk requests with an error of `kind`.
    pub async fn fail_next_bulks(&self, count: usize, kind: ErrorKind) {
        let mut faults = self.faults.lock().await;
        faults.failing_bulks = count;
        faults.bulk_error_kind = Some(kind);
    }

    /// Fails every index existence check with an error of `kind`.
    pub async fn fail_index_checks(&self, kind: ErrorKind) {
        self.faults.lock().await.index_check_error_kind = Some(kind);
    }

    /// Rejects documents with the given identifiers inside otherwise successful bulk responses.
    pub async fn reject_documents<I>(&self, ids: I)
    where
        I: IntoIterator,
        I::Item: Into<DocumentId>,
    {
        let mut faults = self.faults.lock().await;
        faults.rejected_ids.extend(ids.into_iter().map(Into::into));
    }

    pub async fn fail_close(&self) {
        self.faults.lock().await.fail_close = true;
    }

    /// Number of bulk requests received, failed ones included.
    pub async fn bulk_attempts(&self) -> usize {
        self.faults.lock().await.bulk_attempts
    }
}

impl<S> IndexStore for FaultInjectingStore<S>
where
    S: IndexStore + Send + Sync,
{
    fn name() -> &'static str {
        S::name()
    }

    async fn index_exists(&self, index: &str) -> IndexerResult<bool> {
        if let Some(kind) = self.faults.lock().await.index_check_error_kind {
            bail!(kind, "Injected index check failure");
        }

        self.inner.index_exists(index).await
    }

    async fn create_index(&self, index: &str) -> IndexerResult<CreateIndexOutcome> {
        self.inner.create_index(index).await
    }

    async fn bulk(&self, ops: &[IndexOp]) -> IndexerResult<BulkResponse> {
        let rejected_ids = {
            let mut faults = self.faults.lock().await;
            faults.bulk_attempts += 1;

            if faults.failing_bulks > 0 {
                faults.failing_bulks -= 1;
                let kind = faults
                    .bulk_error_kind
                    .unwrap_or(ErrorKind::StoreConnectionFailed);
                bail!(kind, "Injected bulk failure");
            }

            faults.rejected_ids.clone()
        };

        let (rejected, accepted): (Vec<&IndexOp>, Vec<&IndexOp>) = ops
            .iter()
            .partition(|op| rejected_ids.contains(&op.id));
        if rejected.is_empty() {
            return self.inner.bulk(ops).await;
        }

        let accepted: Vec<IndexOp> = accepted.into_iter().cloned().collect();
        let mut written = self.inner.bulk(&accepted).await?.items().to_vec().into_iter();

        // Items keep the order of the submitted operations.
        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            if rejected_ids.contains(&op.id) {
                items.push(BulkItem {
                    id: op.id.clone(),
                    status: 400,
                    outcome: BulkItemOutcome::Failed {
                        error_type: REJECTED_DOCUMENT_ERROR_TYPE.to_owned(),
                        reason: "injected rejection".to_owned(),
                    },
                });
            } else if let Some(item) = written.next() {
                items.push(item);
            }
        }

        Ok(BulkResponse::new(items))
    }

    async fn close(&self) -> IndexerResult<()> {
        let fail_close = self.faults.lock().await.fail_close;
        // The wrapped store is closed either way, like a client whose shutdown reported an error.
        self.inner.close().await?;
        if fail_close {
            bail!(ErrorKind::StoreConnectionFailed, "Injected close failure");
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct BrokerFaults {
    failing_polls: usize,
    failing_commits: usize,
    failing_rewinds: usize,
    fail_close: bool,
}

/// Wraps a [`Broker`] and makes chosen calls fail.
///
/// Failed calls never reach the wrapped broker, so a failed commit leaves its offsets untouched.
#[derive(Debug, Clone)]
pub struct FaultInjectingBroker<B> {
    inner: B,
    faults: Arc<Mutex<BrokerFaults>>,
}

impl<B> FaultInjectingBroker<B> {
    pub fn wrap(broker: B) -> Self {
        Self {
            inner: broker,
            faults: Arc::new(Mutex::new(BrokerFaults::default())),
        }
    }

    pub fn get_inner(&self) -> &B {
        &self.inner
    }

    /// Fails the next `count` polls with [`ErrorKind::BrokerPollFailed`].
    pub async fn fail_next_polls(&self, count: usize) {
        self.faults.lock().await.failing_polls = count;
    }

    /// Fails the next `count` commits with [`ErrorKind::BrokerCommitFailed`].
    pub async fn fail_next_commits(&self, count: usize) {
        self.faults.lock().await.failing_commits = count;
    }

    /// Fails the next `count` rewinds with [`ErrorKind::BrokerSeekFailed`].
    pub async fn fail_next_rewinds(&self, count: usize) {
        self.faults.lock().await.failing_rewinds = count;
    }

    pub async fn fail_close(&self) {
        self.faults.lock().await.fail_close = true;
    }
}

/// Consumes one pending failure of a counter, returning whether the call must fail.
fn take_failure(remaining: &mut usize) -> bool {
    if *remaining == 0 {
        return false;
    }

    *remaining -= 1;
    true
}

impl<B> Broker for FaultInjectingBroker<B>
where
    B: Broker + Send,
{
    fn name() -> &'static str {
        B::name()
    }

    async fn subscribe(&mut self, topic: &str) -> IndexerResult<()> {
        self.inner.subscribe(topic).await
    }

    async fn poll(&mut self, timeout: Duration) -> IndexerResult<Vec<BrokerMessage>> {
        if take_failure(&mut self.faults.lock().await.failing_polls) {
            bail!(ErrorKind::BrokerPollFailed, "Injected poll failure");
        }

        self.inner.poll(timeout).await
    }

    async fn commit(&mut self) -> IndexerResult<()> {
        if take_failure(&mut self.faults.lock().await.failing_commits) {
            bail!(ErrorKind::BrokerCommitFailed, "Injected commit failure");
        }

        self.inner.commit().await
    }

    async fn rewind(&mut self) -> IndexerResult<()> {
        if take_failure(&mut self.faults.lock().await.failing_rewinds) {
            bail!(ErrorKind::BrokerSeekFailed, "Injected rewind failure");
        }

        self.inner.rewind().await
    }

    async fn close(&mut self) -> IndexerResult<()> {
        let fail_close = self.faults.lock().await.fail_close;
        self.inner.close().await?;
        if fail_close {
            bail!(ErrorKind::BrokerError, "Injected close failure");
        }

        Ok(())
    }
}
