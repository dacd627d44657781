use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use super::invariants::{commit_error, EMPLOYMENT};
use super::results::{ListEnvelope, ResultAssembler};
use super::{CompanyService, ProjectService, Requester, ServiceError, ServiceResult};
use crate::config::QueryConfig;
use crate::database::document::{decode, id_value, ids_of, with_system_fields, Document};
use crate::database::models::{schema_for, FieldKind, Schema, User};
use crate::database::{DocumentStore, WriteOp};
use crate::filter::query_string::coerce;
use crate::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `null` values are dropped.
    Create,
    /// `null` values unset the field.
    Update,
}

/// Check a request body against an entity schema and normalize its values.
///
/// Unknown, system and managed fields are rejected. Ids, dates and enum
/// members are normalized the same way query-string filters are, so stored
/// values compare equal to filter values.
pub fn validate_fields(schema: &Schema, body: Value, mode: WriteMode) -> ServiceResult<Document> {
    let body = match body {
        Value::Object(map) => map,
        _ => {
            let mut field_errors = HashMap::new();
            field_errors.insert("body".to_string(), "Request body must be a JSON object".to_string());
            return Err(ServiceError::validation(field_errors, schema.entity));
        }
    };

    let mut fields = Document::new();
    let mut field_errors = HashMap::new();
    for (name, value) in body {
        if Schema::is_system_field(&name) {
            field_errors.insert(name, "System field cannot be set via API".to_string());
            continue;
        }
        let Some(field) = schema.field(&name) else {
            field_errors.insert(name, "Unknown field".to_string());
            continue;
        };
        if field.managed {
            field_errors.insert(name, "Field is maintained by the server".to_string());
            continue;
        }
        if value.is_null() {
            if mode == WriteMode::Update {
                fields.insert(name, Value::Null);
            }
            continue;
        }
        match normalize(&name, field.kind, value) {
            Ok(value) => {
                fields.insert(name, value);
            }
            Err(message) => {
                field_errors.insert(name, message);
            }
        }
    }

    if !field_errors.is_empty() {
        return Err(ServiceError::validation(field_errors, schema.entity));
    }
    Ok(fields)
}

fn normalize(name: &str, kind: FieldKind, value: Value) -> Result<Value, String> {
    match (kind, value) {
        (FieldKind::String, value @ Value::String(_)) => Ok(value),
        (FieldKind::Number, value @ Value::Number(_)) => Ok(value),
        (FieldKind::Boolean, value @ Value::Bool(_)) => Ok(value),
        (FieldKind::Date | FieldKind::Id | FieldKind::Enum(_), Value::String(raw)) => {
            coerce(name, &raw, Some(kind)).map_err(|e| e.to_string())
        }
        (FieldKind::Ids, Value::Array(items)) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                let raw = item.as_str().ok_or_else(|| "Expected a list of ids".to_string())?;
                let id = coerce(name, raw, Some(FieldKind::Id)).map_err(|e| e.to_string())?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Ok(Value::Array(ids))
        }
        (kind, _) => Err(format!("Expected {}", describe(kind))),
    }
}

fn describe(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "a string",
        FieldKind::Number => "a number",
        FieldKind::Boolean => "a boolean",
        FieldKind::Date => "an RFC 3339 date",
        FieldKind::Id => "an id",
        FieldKind::Ids => "a list of ids",
        FieldKind::Enum(_) => "one of the allowed values",
    }
}

/// Every id in a reference field must point at an existing document.
pub async fn check_references(store: &dyn DocumentStore, schema: &Schema, fields: &Document) -> ServiceResult<()> {
    for field in schema.fields {
        let (Some(collection), Some(value)) = (field.references, fields.get(field.name)) else {
            continue;
        };
        let ids = match value {
            Value::Array(_) => ids_of(Some(value)),
            Value::String(s) => Uuid::parse_str(s).map(|id| vec![id]).unwrap_or_default(),
            _ => continue,
        };
        if ids.is_empty() {
            continue;
        }
        let found = store.find_by_ids(collection, &ids).await?;
        if found.len() < ids.len() {
            let entity = schema_for(collection).map(|s| s.entity).unwrap_or("Document");
            return Err(ServiceError::not_found(entity));
        }
    }
    Ok(())
}

/// Entry point for `/api/v1/:resource`. Companies and projects go through
/// their dedicated services; the other collections get schema validation and
/// reference checks.
pub struct ResourceService<'a> {
    store: &'a dyn DocumentStore,
    config: &'a QueryConfig,
}

impl<'a> ResourceService<'a> {
    pub fn new(store: &'a dyn DocumentStore, config: &'a QueryConfig) -> Self {
        Self { store, config }
    }

    pub fn schema(resource: &str) -> ServiceResult<&'static Schema> {
        schema_for(resource).ok_or_else(|| ServiceError::NotFound(format!("Unknown resource '{}'", resource)))
    }

    pub async fn list(&self, resource: &str, params: &[(String, String)]) -> ServiceResult<ListEnvelope> {
        let schema = Self::schema(resource)?;
        ResultAssembler::new(self.store, self.config).assemble(schema, params).await
    }

    pub async fn get(&self, resource: &str, id: Uuid) -> ServiceResult<Document> {
        let schema = Self::schema(resource)?;
        ResultAssembler::new(self.store, self.config).fetch_one(schema, id).await
    }

    pub async fn create(&self, requester: &Requester, resource: &str, body: Value) -> ServiceResult<Document> {
        let schema = Self::schema(resource)?;
        match schema.collection {
            "companies" => CompanyService::new(self.store).create(requester, body).await,
            "projects" => ProjectService::new(self.store).create(requester, body).await,
            collection => {
                if collection == "users" && !requester.is_admin() {
                    return Err(ServiceError::not_authorized());
                }
                let mut fields = validate_fields(schema, body, WriteMode::Create)?;
                default_author(collection, &mut fields, requester);
                check_references(self.store, schema, &fields).await?;
                let created = self.store.create(collection, with_system_fields(fields)).await?;
                info!("{} created in {} by {}", schema.entity, collection, requester.user_id);
                Ok(created)
            }
        }
    }

    pub async fn update(&self, requester: &Requester, resource: &str, id: Uuid, body: Value) -> ServiceResult<Document> {
        let schema = Self::schema(resource)?;
        match schema.collection {
            "companies" => CompanyService::new(self.store).update(requester, id, body).await,
            "projects" => ProjectService::new(self.store).update(requester, id, body).await,
            collection => {
                let fields = validate_fields(schema, body, WriteMode::Update)?;
                if collection == "users" {
                    authorize_user_update(requester, id, &fields)?;
                }
                check_references(self.store, schema, &fields).await?;
                self.store
                    .update(collection, id, fields)
                    .await?
                    .ok_or_else(|| ServiceError::not_found(schema.entity))
            }
        }
    }

    pub async fn delete(&self, requester: &Requester, resource: &str, id: Uuid) -> ServiceResult<()> {
        let schema = Self::schema(resource)?;
        match schema.collection {
            "companies" => CompanyService::new(self.store).delete(requester, id).await,
            "projects" => ProjectService::new(self.store).delete(requester, id).await,
            "users" => self.delete_user(requester, id).await,
            collection => {
                if !self.store.delete(collection, id).await? {
                    return Err(ServiceError::not_found(schema.entity));
                }
                info!("{} {} deleted by {}", schema.entity, id, requester.user_id);
                Ok(())
            }
        }
    }

    /// Removing a user also ends their employment and team memberships.
    async fn delete_user(&self, requester: &Requester, id: Uuid) -> ServiceResult<()> {
        if !requester.is_admin() {
            return Err(ServiceError::not_authorized());
        }
        let doc = self
            .store
            .find_by_id("users", id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;
        let user: User = decode(doc)?;

        let mut ops = Vec::new();
        if let Some(company) = user.company {
            ops.push(WriteOp::release(EMPLOYMENT, id, company));
        }
        ops.push(WriteOp::Pull {
            collection: "companies".to_string(),
            filter: Filter::eq("employees", id_value(id))?,
            field: "employees".to_string(),
            values: vec![id_value(id)],
        });
        ops.push(WriteOp::Pull {
            collection: "projects".to_string(),
            filter: Filter::eq("team", id_value(id))?,
            field: "team".to_string(),
            values: vec![id_value(id)],
        });
        ops.push(WriteOp::Delete { collection: "users".to_string(), id });
        self.store.transact(ops).await.map_err(commit_error)?;

        info!("User {} deleted by {}", id, requester.user_id);
        Ok(())
    }
}

/// Admins may edit anyone; users may edit their own profile but not their role.
fn authorize_user_update(requester: &Requester, id: Uuid, fields: &Document) -> ServiceResult<()> {
    if requester.is_admin() {
        return Ok(());
    }
    if requester.user_id != id || fields.contains_key("role") {
        warn!("User {} attempted to modify user {} without admin rights", requester.user_id, id);
        return Err(ServiceError::not_authorized());
    }
    Ok(())
}

/// Tickets and comments record who wrote them unless the body says otherwise.
fn default_author(collection: &str, fields: &mut Document, requester: &Requester) {
    let field = match collection {
        "tickets" => "createdBy",
        "comments" => "author",
        _ => return,
    };
    fields
        .entry(field.to_string())
        .or_insert_with(|| id_value(requester.user_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::document::document_id;
    use crate::database::models::Role;
    use crate::database::MemoryStore;
    use serde_json::json;

    fn admin() -> Requester {
        Requester { user_id: Uuid::new_v4(), role: Role::Admin }
    }

    #[test]
    fn validation_rejects_unknown_system_and_managed_fields() {
        let users = schema_for("users").unwrap();
        let err = validate_fields(
            users,
            json!({ "name": "Ada", "nickname": "a", "_id": "x", "company": Uuid::new_v4().to_string() }),
            WriteMode::Create,
        )
        .unwrap_err();
        match err {
            ServiceError::Validation { field_errors, .. } => {
                let mut keys: Vec<_> = field_errors.keys().cloned().collect();
                keys.sort();
                assert_eq!(keys, vec!["_id", "company", "nickname"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn validation_checks_kinds_and_normalizes() {
        let tickets = schema_for("tickets").unwrap();
        let id = Uuid::new_v4();
        let fields = validate_fields(
            tickets,
            json!({ "title": "Broken", "priority": 3, "status": "OPEN", "assignee": id.to_string().to_uppercase() }),
            WriteMode::Create,
        )
        .unwrap();
        assert_eq!(fields["assignee"], json!(id.to_string()));

        for bad in [json!({ "priority": "high" }), json!({ "status": "DONE" }), json!({ "title": 7 })] {
            assert!(validate_fields(tickets, bad, WriteMode::Create).is_err());
        }
        assert!(validate_fields(tickets, json!(["not", "an", "object"]), WriteMode::Create).is_err());
    }

    #[test]
    fn nulls_unset_on_update_only() {
        let companies = schema_for("companies").unwrap();
        let created = validate_fields(companies, json!({ "name": "A", "assignedRepresentative": null }), WriteMode::Create).unwrap();
        assert!(!created.contains_key("assignedRepresentative"));
        let updated = validate_fields(companies, json!({ "assignedRepresentative": null }), WriteMode::Update).unwrap();
        assert_eq!(updated["assignedRepresentative"], Value::Null);
    }

    #[tokio::test]
    async fn references_must_exist() {
        let store = MemoryStore::new();
        let config = AppConfig::development().query;
        let service = ResourceService::new(&store, &config);
        let err = service
            .create(&admin(), "tickets", json!({ "title": "x", "project": Uuid::new_v4().to_string() }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(msg) if msg == "Project not found"));
    }

    #[tokio::test]
    async fn ticket_records_its_author() {
        let store = MemoryStore::new();
        let config = AppConfig::development().query;
        let service = ResourceService::new(&store, &config);
        let author = service.create(&admin(), "users", json!({ "name": "Ada" })).await.unwrap();
        let requester = Requester { user_id: document_id(&author).unwrap(), role: Role::Client };
        let ticket = service.create(&requester, "tickets", json!({ "title": "Crash" })).await.unwrap();
        assert_eq!(ticket["createdBy"], author["_id"]);
    }

    #[tokio::test]
    async fn users_cannot_promote_themselves() {
        let store = MemoryStore::new();
        let config = AppConfig::development().query;
        let service = ResourceService::new(&store, &config);
        let user = service.create(&admin(), "users", json!({ "name": "Ada", "role": "STAFF" })).await.unwrap();
        let id = document_id(&user).unwrap();
        let me = Requester { user_id: id, role: Role::Staff };

        let err = service.update(&me, "users", id, json!({ "role": "ADMIN" })).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        let renamed = service.update(&me, "users", id, json!({ "name": "Ada L." })).await.unwrap();
        assert_eq!(renamed["name"], "Ada L.");
    }

    #[tokio::test]
    async fn deleting_a_user_ends_employment() {
        let store = MemoryStore::new();
        let config = AppConfig::development().query;
        let service = ResourceService::new(&store, &config);
        let user = service.create(&admin(), "users", json!({ "name": "Ada" })).await.unwrap();
        let user_id = document_id(&user).unwrap();
        let company = service
            .create(&admin(), "companies", json!({ "name": "A", "employees": [user_id.to_string()] }))
            .await
            .unwrap();

        service.delete(&admin(), "users", user_id).await.unwrap();

        let company = store.find_by_id("companies", document_id(&company).unwrap()).await.unwrap().unwrap();
        assert_eq!(company["employees"], json!([]));
        assert!(matches!(
            service.delete(&admin(), "users", user_id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let store = MemoryStore::new();
        let config = AppConfig::development().query;
        let err = ResourceService::new(&store, &config).list("invoices", &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
