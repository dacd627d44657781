use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::config::QueryConfig;
use crate::database::document::{document_id, project, Document};
use crate::database::models::{Relation, Schema};
use crate::database::{DocumentStore, StoreError};
use crate::filter::filter_order::FilterOrder;
use crate::filter::{FindQuery, PageRequest, Pagination, QueryParams};

/// Uniform list response.
///
/// `count` is the number of documents matching the filter, counted in a
/// separate round-trip from the page fetch. Writes landing between the two
/// can make `count` and `data` disagree.
#[derive(Debug, Clone, Serialize)]
pub struct ListEnvelope {
    pub success: bool,
    pub count: u64,
    /// Present only when the request was paginated; may be empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub data: Vec<Document>,
}

/// Turns a list request's query string into a populated, paginated envelope.
pub struct ResultAssembler<'a> {
    store: &'a dyn DocumentStore,
    config: &'a QueryConfig,
}

impl<'a> ResultAssembler<'a> {
    pub fn new(store: &'a dyn DocumentStore, config: &'a QueryConfig) -> Self {
        Self { store, config }
    }

    pub async fn assemble(&self, schema: &Schema, params: &[(String, String)]) -> ServiceResult<ListEnvelope> {
        let query = QueryParams::parse(params, Some(schema))?;
        let page = PageRequest::from_params(query.page.as_deref(), query.limit.as_deref(), self.config.max_limit);
        let sort = match query.sort {
            Some(sort) => sort,
            None => FilterOrder::parse(&self.config.default_sort, Some(schema))?,
        };

        let find = FindQuery {
            filter: query.filter,
            projection: query.select,
            sort,
            skip: page.map(|p| p.skip()),
            limit: page.map(|p| p.limit),
        };

        if self.config.debug_logging {
            debug!(
                "list {} filter={} sort={:?} page={:?} select={:?}",
                schema.collection,
                find.filter.to_document(),
                find.sort,
                page,
                find.projection
            );
        }

        let (count, mut data) = tokio::try_join!(
            self.store.count(schema.collection, &find.filter),
            self.store.find(schema.collection, &find),
        )?;

        self.populate(schema, &mut data).await?;

        Ok(ListEnvelope {
            success: true,
            count,
            pagination: page.map(|p| p.links(count)),
            data,
        })
    }

    /// Fetch one document by id with its relations populated.
    pub async fn fetch_one(&self, schema: &Schema, id: Uuid) -> ServiceResult<Document> {
        let doc = self
            .store
            .find_by_id(schema.collection, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(schema.entity))?;
        let mut docs = vec![doc];
        self.populate(schema, &mut docs).await?;
        docs.pop().ok_or_else(|| ServiceError::not_found(schema.entity))
    }

    /// Replace reference ids with embedded referents, one batched lookup per
    /// relation. Relations absent from the (possibly projected) documents are
    /// skipped; missing referents become `null` or drop out of arrays.
    pub async fn populate(&self, schema: &Schema, docs: &mut [Document]) -> ServiceResult<()> {
        let pending: Vec<(&'static Relation, Vec<Uuid>)> = schema
            .populate
            .iter()
            .map(|relation| (relation, referenced_ids(docs, relation.field)))
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        let resolved = try_join_all(pending.into_iter().map(|(relation, ids)| self.lookup(relation, ids))).await?;

        for (relation, referents) in resolved {
            for doc in docs.iter_mut() {
                if let Some(value) = doc.get_mut(relation.field) {
                    embed(value, &referents);
                }
            }
        }
        Ok(())
    }

    async fn lookup(
        &self,
        relation: &'static Relation,
        ids: Vec<Uuid>,
    ) -> Result<(&'static Relation, HashMap<String, Value>), StoreError> {
        let found = self.store.find_by_ids(relation.collection, &ids).await?;
        let fields: Vec<String> = relation.select.iter().map(|f| f.to_string()).collect();
        let referents = found
            .iter()
            .filter_map(|doc| {
                let id = document_id(doc)?;
                Some((id.to_string(), Value::Object(project(doc, &fields))))
            })
            .collect();
        Ok((relation, referents))
    }
}

fn referenced_ids(docs: &[Document], field: &str) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for value in docs.iter().filter_map(|doc| doc.get(field)) {
        let candidates: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for id in candidates.into_iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn embed(value: &mut Value, referents: &HashMap<String, Value>) {
    match value {
        Value::Array(items) => {
            let embedded = items
                .iter()
                .filter_map(|item| item.as_str().and_then(|id| referents.get(id)).cloned())
                .collect();
            *items = embedded;
        }
        Value::String(id) => {
            *value = referents.get(id.as_str()).cloned().unwrap_or(Value::Null);
        }
        _ => {}
    }
}
