use std::future::Future;

use crate::error::IndexerResult;
use crate::store::bulk::BulkResponse;
use crate::types::IndexOp;

/// Outcome of [`IndexStore::create_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateIndexOutcome {
    Created,
    /// Another client created the index first.
    AlreadyExists,
}

/// A document store that indexes JSON documents by identifier.
///
/// Writing a document with an identifier that already exists must overwrite it, since the
/// consume-commit loop relies on re-indexing being idempotent after a redelivery.
pub trait IndexStore {
    /// Returns the name of the store, used in logs.
    fn name() -> &'static str;

    fn index_exists(&self, index: &str) -> impl Future<Output = IndexerResult<bool>> + Send;

    fn create_index(
        &self,
        index: &str,
    ) -> impl Future<Output = IndexerResult<CreateIndexOutcome>> + Send;

    /// Submits all `ops` in a single round trip.
    ///
    /// Returns the per-item outcomes. An error means the round trip itself failed, in which case
    /// nothing can be assumed about which documents were written.
    fn bulk(&self, ops: &[IndexOp]) -> impl Future<Output = IndexerResult<BulkResponse>> + Send;

    /// Releases the connection to the store. The default implementation is a no-op.
    fn close(&self) -> impl Future<Output = IndexerResult<()>> + Send {
        async { Ok(()) }
    }
}
