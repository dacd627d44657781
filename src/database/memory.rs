use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::document::{apply_changes, document_id, project, pull_values, Document};
use super::store::{DocumentStore, StoreError, StoreResult, WriteOp};
use crate::filter::eval::compare_docs;
use crate::filter::{Filter, FindQuery};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// Documents per collection, in insertion order.
    collections: HashMap<String, Vec<Document>>,
    claims: HashMap<(String, Uuid), Uuid>,
}

/// In-process document store for development and tests.
///
/// Reads share the lock; `transact` stages every op on a copy of the state
/// and swaps it in only when the whole batch succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn position(&self, collection: &str, id: Uuid) -> Option<usize> {
        self.collections
            .get(collection)?
            .iter()
            .position(|doc| document_id(doc) == Some(id))
    }

    fn apply(&mut self, op: WriteOp, written: &mut Vec<Document>) -> StoreResult<()> {
        match op {
            WriteOp::Insert { collection, document } => {
                let id = document_id(&document)
                    .ok_or_else(|| StoreError::QueryError("document has no valid _id".to_string()))?;
                if self.position(&collection, id).is_some() {
                    return Err(StoreError::DuplicateId { collection, id });
                }
                written.push(document.clone());
                self.collections.entry(collection).or_default().push(document);
            }
            WriteOp::Update { collection, id, changes } => {
                let index = self
                    .position(&collection, id)
                    .ok_or_else(|| StoreError::NotFound { collection: collection.clone(), id })?;
                let docs = self.collections.entry(collection).or_default();
                apply_changes(&mut docs[index], &changes);
                written.push(docs[index].clone());
            }
            WriteOp::Delete { collection, id } => {
                let index = self
                    .position(&collection, id)
                    .ok_or_else(|| StoreError::NotFound { collection: collection.clone(), id })?;
                self.collections.entry(collection).or_default().remove(index);
            }
            WriteOp::Pull { collection, filter, field, values } => {
                if let Some(docs) = self.collections.get_mut(&collection) {
                    for doc in docs.iter_mut().filter(|doc| filter.matches(doc)) {
                        pull_values(doc, &field, &values);
                    }
                }
            }
            WriteOp::Claim { namespace, key, owner } => {
                match self.claims.get(&(namespace.clone(), key)) {
                    Some(current) if *current != owner => {
                        return Err(StoreError::UniqueViolation { namespace, key, owner: *current });
                    }
                    Some(_) => {}
                    None => {
                        self.claims.insert((namespace, key), owner);
                    }
                }
            }
            WriteOp::Release { namespace, key, owner } => {
                let slot = (namespace, key);
                if self.claims.get(&slot) == Some(&owner) {
                    self.claims.remove(&slot);
                }
            }
            WriteOp::Contains { collection, id, field, values } => {
                let index = self
                    .position(&collection, id)
                    .ok_or_else(|| StoreError::NotFound { collection: collection.clone(), id })?;
                let doc = &self.collections[&collection][index];
                let present = doc.get(&field).and_then(|v| v.as_array());
                let missing: Vec<_> = values
                    .into_iter()
                    .filter(|v| !present.is_some_and(|items| items.contains(v)))
                    .collect();
                if !missing.is_empty() {
                    return Err(StoreError::GuardFailed { collection, id, field, missing });
                }
            }
            WriteOp::Expect { collection, id, field, value } => {
                let index = self
                    .position(&collection, id)
                    .ok_or_else(|| StoreError::NotFound { collection: collection.clone(), id })?;
                let current = self.collections[&collection][index].get(&field).unwrap_or(&Value::Null);
                if *current != value {
                    return Err(StoreError::StaleWrite { collection, id, field });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let state = self.state.read().await;
        let mut matched: Vec<&Document> = state
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| query.filter.matches(doc)).collect())
            .unwrap_or_default();
        sort_matches(&mut matched, query);

        let skip = usize::try_from(query.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match &query.projection {
                Some(fields) => project(doc, fields),
                None => doc.clone(),
            })
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let state = self.state.read().await;
        let count = state
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn find_by_id(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state
            .position(collection, id)
            .map(|index| state.collections[collection][index].clone()))
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<Document>> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let mut written = Vec::new();
        for op in ops {
            staged.apply(op, &mut written)?;
        }
        *state = staged;
        Ok(written)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn sort_matches(matched: &mut [&Document], query: &FindQuery) {
    matched.sort_by(|a, b| compare_docs(a, b, &query.sort));
}
