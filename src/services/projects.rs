use serde_json::Value;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use super::invariants::{commit_error, InvariantEnforcer};
use super::resources::{validate_fields, WriteMode};
use super::{Requester, ServiceError, ServiceResult};
use crate::database::document::{decode, id_values, ids_of, stamp, Document};
use crate::database::models::project::SCHEMA;
use crate::database::models::{Company, Project};
use crate::database::{DocumentStore, WriteOp};

/// Project writes. A team is only accepted when every member is employed by
/// the project's company, and the commit re-checks that containment inside
/// the same batch.
pub struct ProjectService<'a> {
    store: &'a dyn DocumentStore,
    enforcer: InvariantEnforcer<'a>,
}

impl<'a> ProjectService<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store, enforcer: InvariantEnforcer::new(store) }
    }

    pub async fn create(&self, requester: &Requester, body: Value) -> ServiceResult<Document> {
        let mut fields = validate_fields(&SCHEMA, body, WriteMode::Create)?;
        let company_id = match fields.get("company").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok()) {
            Some(id) => id,
            None => return Err(company_required()),
        };
        let (_, company) = self.enforcer.load_company(company_id).await?;
        self.enforcer.authorize(&company, requester)?;

        let team = dedup(ids_of(fields.get("team")));
        self.enforcer.check_team(&company, &team)?;
        fields.insert("team".to_string(), Value::Array(id_values(&team)));

        let id = Uuid::new_v4();
        let ops = vec![
            membership_guard(company_id, &team),
            WriteOp::Insert { collection: SCHEMA.collection.to_string(), document: stamp(fields, id) },
        ];
        let project = self.commit(ops).await?;
        info!("Project {} created by {} for company {}", id, requester.user_id, company_id);
        Ok(project)
    }

    pub async fn update(&self, requester: &Requester, id: Uuid, body: Value) -> ServiceResult<Document> {
        let mut fields = validate_fields(&SCHEMA, body, WriteMode::Update)?;
        let (current, project) = self.load(id).await?;
        self.authorize_for(project.company, requester).await?;

        let target_id = match fields.get("company") {
            None => project.company,
            Some(value) => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(company_required)?,
        };
        let company_changed = target_id != project.company;
        let team_changed = fields.contains_key("team");

        let mut ops = Vec::new();
        if company_changed || team_changed {
            let (_, target) = self.enforcer.load_company(target_id).await?;
            if company_changed {
                self.enforcer.authorize(&target, requester)?;
            }
            let team = if team_changed { dedup(ids_of(fields.get("team"))) } else { project.team.clone() };
            self.enforcer.check_team(&target, &team)?;
            if team_changed {
                fields.insert("team".to_string(), Value::Array(id_values(&team)));
            }

            // The field this write does not touch must not move underneath it.
            let untouched = if team_changed { "company" } else { "team" };
            ops.push(WriteOp::expect(
                SCHEMA.collection,
                id,
                untouched,
                current.get(untouched).cloned().unwrap_or(Value::Null),
            ));
            ops.push(membership_guard(target_id, &team));
        }
        ops.push(WriteOp::update(SCHEMA.collection, id, fields));

        self.commit(ops).await
    }

    pub async fn delete(&self, requester: &Requester, id: Uuid) -> ServiceResult<()> {
        let (_, project) = self.load(id).await?;
        self.authorize_for(project.company, requester).await?;
        self.store
            .transact(vec![WriteOp::Delete { collection: SCHEMA.collection.to_string(), id }])
            .await
            .map_err(commit_error)?;
        info!("Project {} deleted by {}", id, requester.user_id);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ServiceResult<(Document, Project)> {
        let doc = self
            .store
            .find_by_id(SCHEMA.collection, id)
            .await?
            .ok_or_else(|| ServiceError::not_found(SCHEMA.entity))?;
        let project = decode(doc.clone())?;
        Ok((doc, project))
    }

    /// Admins may touch any project; others must work for its company. A
    /// project whose company is gone is admin-only.
    async fn authorize_for(&self, company_id: Uuid, requester: &Requester) -> ServiceResult<()> {
        if requester.is_admin() {
            return Ok(());
        }
        match self.store.find_by_id("companies", company_id).await? {
            Some(doc) => {
                let company: Company = decode(doc)?;
                self.enforcer.authorize(&company, requester)
            }
            None => Err(ServiceError::not_authorized()),
        }
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> ServiceResult<Document> {
        let written = self.store.transact(ops).await.map_err(commit_error)?;
        written.into_iter().next().ok_or_else(|| ServiceError::not_found(SCHEMA.entity))
    }
}

/// Abort the batch unless the company still employs every team member.
fn membership_guard(company_id: Uuid, team: &[Uuid]) -> WriteOp {
    WriteOp::Contains {
        collection: "companies".to_string(),
        id: company_id,
        field: "employees".to_string(),
        values: id_values(team),
    }
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn company_required() -> ServiceError {
    let mut field_errors = HashMap::new();
    field_errors.insert("company".to_string(), "A project must belong to a company".to_string());
    ServiceError::validation(field_errors, SCHEMA.entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::document::{document_id, with_system_fields};
    use crate::database::models::Role;
    use crate::database::MemoryStore;
    use crate::testing::InterleavedStore;
    use serde_json::json;

    struct Fixture {
        store: MemoryStore,
        company: Uuid,
        employee: Uuid,
        outsider: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let mut ids = vec![];
        for name in ["Emma", "Oscar"] {
            let user = store
                .create("users", with_system_fields(json!({ "name": name }).as_object().cloned().unwrap()))
                .await
                .unwrap();
            ids.push(document_id(&user).unwrap());
        }
        let company = store
            .create(
                "companies",
                with_system_fields(json!({ "name": "Acme", "employees": [ids[0].to_string()] }).as_object().cloned().unwrap()),
            )
            .await
            .unwrap();
        Fixture { company: document_id(&company).unwrap(), employee: ids[0], outsider: ids[1], store }
    }

    fn admin() -> Requester {
        Requester { user_id: Uuid::new_v4(), role: Role::Admin }
    }

    #[tokio::test]
    async fn team_must_be_company_employees() {
        let f = fixture().await;
        let service = ProjectService::new(&f.store);

        let ok = service
            .create(&admin(), json!({ "name": "Apollo", "company": f.company.to_string(), "team": [f.employee.to_string()] }))
            .await;
        assert!(ok.is_ok());

        let err = service
            .create(
                &admin(),
                json!({ "name": "Gemini", "company": f.company.to_string(), "team": [f.employee.to_string(), f.outsider.to_string()] }),
            )
            .await
            .unwrap_err();
        match err {
            ServiceError::InvariantViolation { field_errors, .. } => {
                assert_eq!(field_errors.keys().collect::<Vec<_>>(), vec![&format!("team.{}", f.outsider)]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_rechecks_team() {
        let f = fixture().await;
        let service = ProjectService::new(&f.store);
        let project = service
            .create(&admin(), json!({ "name": "Apollo", "company": f.company.to_string() }))
            .await
            .unwrap();
        let id = document_id(&project).unwrap();

        let err = service
            .update(&admin(), id, json!({ "team": [f.outsider.to_string()] }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvariantViolation { .. }));

        let updated = service
            .update(&admin(), id, json!({ "team": [f.employee.to_string(), f.employee.to_string()] }))
            .await
            .unwrap();
        assert_eq!(updated["team"], json!([f.employee.to_string()]));
    }

    #[tokio::test]
    async fn requires_company_and_authorization() {
        let f = fixture().await;
        let service = ProjectService::new(&f.store);

        let err = service.create(&admin(), json!({ "name": "Nowhere" })).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));

        let stranger = Requester { user_id: f.outsider, role: Role::Developer };
        let err = service
            .create(&stranger, json!({ "name": "Sneaky", "company": f.company.to_string() }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let member = Requester { user_id: f.employee, role: Role::Developer };
        assert!(service
            .create(&member, json!({ "name": "Fine", "company": f.company.to_string() }))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn team_change_conflicts_with_a_company_move_committed_after_the_read() {
        let f = fixture().await;
        let (company, employee) = (f.company, f.employee);
        let store = InterleavedStore::new(f.store);
        let service = ProjectService::new(&store);
        let project = service
            .create(&admin(), json!({ "name": "Apollo", "company": company.to_string() }))
            .await
            .unwrap();
        let id = document_id(&project).unwrap();
        let elsewhere = store
            .inner()
            .create("companies", with_system_fields(json!({ "name": "Elsewhere" }).as_object().cloned().unwrap()))
            .await
            .unwrap();

        let mut moved = Document::new();
        moved.insert("company".to_string(), elsewhere["_id"].clone());
        store.interleave(vec![WriteOp::update(SCHEMA.collection, id, moved)]);
        let err = service
            .update(&admin(), id, json!({ "team": [employee.to_string()] }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let stored = store.find_by_id("projects", id).await.unwrap().unwrap();
        assert_eq!(stored["company"], elsewhere["_id"]);
        assert_eq!(stored["team"], json!([]));
    }

    #[tokio::test]
    async fn company_move_conflicts_with_a_team_change_committed_after_the_read() {
        let f = fixture().await;
        let (company, employee) = (f.company, f.employee);
        let store = InterleavedStore::new(f.store);
        let service = ProjectService::new(&store);
        let project = service
            .create(&admin(), json!({ "name": "Apollo", "company": company.to_string() }))
            .await
            .unwrap();
        let id = document_id(&project).unwrap();
        let target = store
            .inner()
            .create("companies", with_system_fields(json!({ "name": "Target" }).as_object().cloned().unwrap()))
            .await
            .unwrap();
        let target_id = document_id(&target).unwrap();

        let mut staffed = Document::new();
        staffed.insert("team".to_string(), json!([employee.to_string()]));
        store.interleave(vec![WriteOp::update(SCHEMA.collection, id, staffed)]);
        let err = service
            .update(&admin(), id, json!({ "company": target_id.to_string() }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        // The concurrent team stays with the company that employs it.
        let stored: Project = decode(store.find_by_id("projects", id).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored.company, company);
        assert_eq!(stored.team, vec![employee]);
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let f = fixture().await;
        let err = ProjectService::new(&f.store).delete(&admin(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(msg) if msg == "Project not found"));
    }
}
