use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgArguments, types::Json, PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::document::{apply_changes, document_id, project, pull_values, Document};
use super::manager::DatabaseManager;
use super::store::{DocumentStore, StoreError, StoreResult, WriteOp};
use crate::filter::filter_order::FilterOrder;
use crate::filter::filter_where::FilterWhere;
use crate::filter::{Filter, FindQuery, SqlResult, MAX_OFFSET};

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id UUID NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS documents_data_gin ON documents USING GIN (data jsonb_path_ops);
CREATE TABLE IF NOT EXISTS claims (
    namespace TEXT NOT NULL,
    key UUID NOT NULL,
    owner UUID NOT NULL,
    PRIMARY KEY (namespace, key)
);
"#;

/// Postgres-backed document store. Every collection shares one JSONB table;
/// uniqueness claims live in their own table keyed by `(namespace, key)`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes when missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in MIGRATION.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Document store schema is up to date");
        Ok(())
    }

    fn select_sql(collection_param: usize, query: &FindQuery) -> StoreResult<SqlResult> {
        let (where_clause, params) = FilterWhere::generate(&query.filter, collection_param)?;
        let order_clause = FilterOrder::generate(&query.sort)?;
        let mut sql = format!(
            "SELECT data FROM documents WHERE collection = ${} AND {} {}",
            collection_param, where_clause, order_clause
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit.min(MAX_OFFSET)));
        }
        if let Some(skip) = query.skip.filter(|s| *s > 0) {
            sql.push_str(&format!(" OFFSET {}", skip.min(MAX_OFFSET)));
        }
        Ok(SqlResult { query: sql, params })
    }

    async fn apply(tx: &mut Transaction<'static, Postgres>, op: WriteOp, written: &mut Vec<Document>) -> StoreResult<()> {
        match op {
            WriteOp::Insert { collection, document } => {
                let id = document_id(&document)
                    .ok_or_else(|| StoreError::QueryError("document has no valid _id".to_string()))?;
                let inserted = sqlx::query(
                    "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                )
                .bind(&collection)
                .bind(id)
                .bind(Json(Value::Object(document.clone())))
                .execute(&mut **tx)
                .await?;
                if inserted.rows_affected() == 0 {
                    return Err(StoreError::DuplicateId { collection, id });
                }
                written.push(document);
            }
            WriteOp::Update { collection, id, changes } => {
                let mut doc = Self::lock_row(tx, &collection, id, "FOR UPDATE").await?;
                apply_changes(&mut doc, &changes);
                sqlx::query("UPDATE documents SET data = $3 WHERE collection = $1 AND id = $2")
                    .bind(&collection)
                    .bind(id)
                    .bind(Json(Value::Object(doc.clone())))
                    .execute(&mut **tx)
                    .await?;
                written.push(doc);
            }
            WriteOp::Delete { collection, id } => {
                let deleted = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                    .bind(&collection)
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                if deleted.rows_affected() == 0 {
                    return Err(StoreError::NotFound { collection, id });
                }
            }
            WriteOp::Pull { collection, filter, field, values } => {
                let (where_clause, params) = FilterWhere::generate(&filter, 1)?;
                let sql = format!(
                    "SELECT id, data FROM documents WHERE collection = $1 AND {} FOR UPDATE",
                    where_clause
                );
                let rows = bind_params(sqlx::query(&sql).bind(&collection), &params)
                    .fetch_all(&mut **tx)
                    .await?;
                for row in rows {
                    let id: Uuid = row.try_get("id")?;
                    let mut doc = row_document(&row)?;
                    if pull_values(&mut doc, &field, &values) {
                        sqlx::query("UPDATE documents SET data = $3 WHERE collection = $1 AND id = $2")
                            .bind(&collection)
                            .bind(id)
                            .bind(Json(Value::Object(doc)))
                            .execute(&mut **tx)
                            .await?;
                    }
                }
            }
            WriteOp::Claim { namespace, key, owner } => {
                // Blocks on a concurrent uncommitted claim of the same key
                // until that transaction finishes.
                let inserted = sqlx::query(
                    "INSERT INTO claims (namespace, key, owner) VALUES ($1, $2, $3) ON CONFLICT (namespace, key) DO NOTHING",
                )
                .bind(&namespace)
                .bind(key)
                .bind(owner)
                .execute(&mut **tx)
                .await?;
                if inserted.rows_affected() == 0 {
                    let current: Option<Uuid> =
                        sqlx::query_scalar("SELECT owner FROM claims WHERE namespace = $1 AND key = $2")
                            .bind(&namespace)
                            .bind(key)
                            .fetch_optional(&mut **tx)
                            .await?;
                    match current {
                        Some(current) if current != owner => {
                            return Err(StoreError::UniqueViolation { namespace, key, owner: current });
                        }
                        Some(_) => {}
                        None => {
                            return Err(StoreError::QueryError(format!(
                                "claim {}/{} vanished during insert",
                                namespace, key
                            )));
                        }
                    }
                }
            }
            WriteOp::Release { namespace, key, owner } => {
                sqlx::query("DELETE FROM claims WHERE namespace = $1 AND key = $2 AND owner = $3")
                    .bind(&namespace)
                    .bind(key)
                    .bind(owner)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteOp::Contains { collection, id, field, values } => {
                let doc = Self::lock_row(tx, &collection, id, "FOR SHARE").await?;
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
                let doc = Self::lock_row(tx, &collection, id, "FOR UPDATE").await?;
                if *doc.get(&field).unwrap_or(&Value::Null) != value {
                    return Err(StoreError::StaleWrite { collection, id, field });
                }
            }
        }
        Ok(())
    }

    async fn lock_row(
        tx: &mut Transaction<'static, Postgres>,
        collection: &str,
        id: Uuid,
        lock: &str,
    ) -> StoreResult<Document> {
        let sql = format!("SELECT data FROM documents WHERE collection = $1 AND id = $2 {}", lock);
        let row = sqlx::query(&sql)
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::NotFound { collection: collection.to_string(), id })?;
        row_document(&row)
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let sql_result = Self::select_sql(1, query)?;
        debug!("find {}: {}", collection, sql_result.query);
        let rows = bind_params(sqlx::query(&sql_result.query).bind(collection), &sql_result.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let doc = row_document(row)?;
                Ok(match &query.projection {
                    Some(fields) => project(&doc, fields),
                    None => doc,
                })
            })
            .collect()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let (where_clause, params) = FilterWhere::generate(filter, 1)?;
        let sql = format!(
            "SELECT COUNT(*) AS count FROM documents WHERE collection = $1 AND {}",
            where_clause
        );
        let row = bind_params(sqlx::query(&sql).bind(collection), &params)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn find_by_id(&self, collection: &str, id: Uuid) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_document).transpose()
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<Document>> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::new();
        for op in ops {
            // Dropping `tx` on error rolls the batch back.
            Self::apply(&mut tx, op, &mut written).await?;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn ping(&self) -> StoreResult<()> {
        DatabaseManager::health_check(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn bind_params<'q>(
    mut q: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for p in params {
        q = q.bind(Json(p.clone()));
    }
    q
}

fn row_document(row: &sqlx::postgres::PgRow) -> StoreResult<Document> {
    let Json(data): Json<Value> = row.try_get("data")?;
    match data {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Decode(format!("expected object, found {}", other))),
    }
}
