use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::document::Document;
use super::models::ID_FIELD;
use crate::filter::{Filter, FilterError, FindQuery};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: Uuid },

    #[error("Duplicate document id: {collection}/{id}")]
    DuplicateId { collection: String, id: Uuid },

    /// A `Claim` hit a key already owned by someone else.
    #[error("{namespace} key {key} already claimed by {owner}")]
    UniqueViolation { namespace: String, key: Uuid, owner: Uuid },

    /// A `Contains` guard found values missing from the guarded array.
    #[error("{collection}/{id}.{field} is missing {missing:?}")]
    GuardFailed { collection: String, id: Uuid, field: String, missing: Vec<Value> },

    /// An `Expect` guard saw a value other than the one the write was planned on.
    #[error("{collection}/{id}.{field} changed concurrently")]
    StaleWrite { collection: String, id: Uuid, field: String },

    #[error("Failed to decode document: {0}")]
    Decode(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One step of an atomic [`DocumentStore::transact`] batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert { collection: String, document: Document },
    /// Merge `changes` into the document; `null` values unset fields.
    Update { collection: String, id: Uuid, changes: Document },
    Delete { collection: String, id: Uuid },
    /// Remove `values` from the array `field` of every document matching `filter`.
    Pull { collection: String, filter: Filter, field: String, values: Vec<Value> },
    /// Record `key -> owner` in a unique namespace. Re-claiming by the same
    /// owner is a no-op; any other owner aborts the batch.
    Claim { namespace: String, key: Uuid, owner: Uuid },
    /// Drop `key` from the namespace if `owner` holds it.
    Release { namespace: String, key: Uuid, owner: Uuid },
    /// Abort unless the array `field` of the document contains every value.
    Contains { collection: String, id: Uuid, field: String, values: Vec<Value> },
    /// Abort unless `field` still holds `value` (`null` matches an absent field).
    Expect { collection: String, id: Uuid, field: String, value: Value },
}

impl WriteOp {
    pub fn update(collection: &str, id: Uuid, changes: Document) -> Self {
        WriteOp::Update { collection: collection.to_string(), id, changes }
    }

    pub fn expect(collection: &str, id: Uuid, field: &str, value: Value) -> Self {
        WriteOp::Expect { collection: collection.to_string(), id, field: field.to_string(), value }
    }

    pub fn claim(namespace: &str, key: Uuid, owner: Uuid) -> Self {
        WriteOp::Claim { namespace: namespace.to_string(), key, owner }
    }

    pub fn release(namespace: &str, key: Uuid, owner: Uuid) -> Self {
        WriteOp::Release { namespace: namespace.to_string(), key, owner }
    }
}

/// Persistence interface consumed by the query engine and write services.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>>;

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    async fn find_by_id(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>>;

    /// Batch lookup used for relation population. Order is unspecified.
    async fn find_by_ids(&self, collection: &str, ids: &[Uuid]) -> StoreResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let values = ids.iter().map(|id| Value::String(id.to_string())).collect();
        let query = FindQuery {
            filter: Filter::any_of(ID_FIELD, values)?,
            ..Default::default()
        };
        self.find(collection, &query).await
    }

    /// All-or-nothing batch. Returns the documents written by `Insert` and
    /// `Update` ops, in op order.
    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<Document>>;

    async fn ping(&self) -> StoreResult<()>;

    async fn create(&self, collection: &str, document: Document) -> StoreResult<Document> {
        let written = self
            .transact(vec![WriteOp::Insert { collection: collection.to_string(), document }])
            .await?;
        single(written)
    }

    /// `findByIdAndUpdate`: `None` when the document does not exist.
    async fn update(&self, collection: &str, id: Uuid, changes: Document) -> StoreResult<Option<Document>> {
        match self.transact(vec![WriteOp::update(collection, id, changes)]).await {
            Ok(written) => single(written).map(Some),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, collection: &str, id: Uuid) -> StoreResult<bool> {
        match self
            .transact(vec![WriteOp::Delete { collection: collection.to_string(), id }])
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn single(mut written: Vec<Document>) -> StoreResult<Document> {
    written
        .pop()
        .ok_or_else(|| StoreError::QueryError("write produced no document".to_string()))
}
