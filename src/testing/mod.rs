//! Store doubles for service tests.

use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use crate::database::{Document, DocumentStore, MemoryStore, StoreResult, WriteOp};
use crate::filter::{Filter, FindQuery};

/// Wraps a [`MemoryStore`] and commits a queued batch right before the next
/// `transact`, as if another request had written between a service's read
/// and its commit.
pub struct InterleavedStore {
    inner: MemoryStore,
    pending: Mutex<Option<Vec<WriteOp>>>,
}

impl InterleavedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self { inner, pending: Mutex::new(None) }
    }

    /// Queue a batch to land before the next commit. Fires once.
    pub fn interleave(&self, ops: Vec<WriteOp>) {
        *self.pending.lock().unwrap() = Some(ops);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for InterleavedStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        self.inner.find(collection, query).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner.count(collection, filter).await
    }

    async fn find_by_id(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        self.inner.find_by_id(collection, id).await
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<Document>> {
        let pending = self.pending.lock().unwrap().take();
        if let Some(concurrent) = pending {
            self.inner.transact(concurrent).await?;
        }
        self.inner.transact(ops).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}
