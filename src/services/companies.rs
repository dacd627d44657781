use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::invariants::{commit_error, CompanyPlan, InvariantEnforcer, EMPLOYMENT};
use super::resources::{validate_fields, WriteMode};
use super::{Requester, ServiceError, ServiceResult};
use crate::database::document::{id_value, id_values, stamp, Document};
use crate::database::models::company::SCHEMA;
use crate::database::models::Company;
use crate::database::{DocumentStore, WriteOp};
use crate::filter::Filter;

/// Company writes. Every employee change is checked by the
/// [`InvariantEnforcer`] and committed as one atomic batch together with the
/// employment claims that keep a user in at most one company.
pub struct CompanyService<'a> {
    store: &'a dyn DocumentStore,
    enforcer: InvariantEnforcer<'a>,
}

impl<'a> CompanyService<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store, enforcer: InvariantEnforcer::new(store) }
    }

    pub async fn create(&self, requester: &Requester, body: Value) -> ServiceResult<Document> {
        let fields = validate_fields(&SCHEMA, body, WriteMode::Create)?;
        let plan = self.enforcer.plan_company_write(None, fields).await?;

        let id = Uuid::new_v4();
        let mut ops: Vec<WriteOp> = plan.hires.iter().map(|u| WriteOp::claim(EMPLOYMENT, *u, id)).collect();
        ops.push(WriteOp::Insert { collection: SCHEMA.collection.to_string(), document: stamp(plan.changes, id) });
        ops.extend(plan.hires.iter().map(|u| set_employer(*u, id_value(id))));

        let company = self.commit(ops).await?;
        info!("Company {} created by {} with {} employees", id, requester.user_id, plan.hires.len());
        Ok(company)
    }

    pub async fn update(&self, requester: &Requester, id: Uuid, body: Value) -> ServiceResult<Document> {
        let fields = validate_fields(&SCHEMA, body, WriteMode::Update)?;
        let loaded = self.enforcer.load_company(id).await?;
        self.apply(requester, id, loaded, fields).await
    }

    pub async fn add_employee(&self, requester: &Requester, id: Uuid, user_id: Uuid) -> ServiceResult<Document> {
        let loaded = self.enforcer.load_company(id).await?;
        let mut employees = loaded.1.employees.clone();
        employees.push(user_id);
        self.apply(requester, id, loaded, employees_change(&employees)).await
    }

    pub async fn remove_employee(&self, requester: &Requester, id: Uuid, user_id: Uuid) -> ServiceResult<Document> {
        let loaded = self.enforcer.load_company(id).await?;
        if !loaded.1.employs(user_id) {
            return Err(ServiceError::NotFound(format!("User {} is not an employee of this company", user_id)));
        }
        let employees: Vec<Uuid> = loaded.1.employees.iter().copied().filter(|e| *e != user_id).collect();
        self.apply(requester, id, loaded, employees_change(&employees)).await
    }

    pub async fn delete(&self, requester: &Requester, id: Uuid) -> ServiceResult<()> {
        let (doc, company) = self.enforcer.load_company(id).await?;
        self.enforcer.authorize(&company, requester)?;

        let mut ops = vec![WriteOp::expect(
            SCHEMA.collection,
            id,
            "employees",
            doc.get("employees").cloned().unwrap_or(Value::Null),
        )];
        ops.extend(release_ops(id, &company.employees)?);
        ops.push(WriteOp::Delete { collection: SCHEMA.collection.to_string(), id });
        self.store.transact(ops).await.map_err(commit_error)?;

        info!("Company {} deleted by {}, released {} employees", id, requester.user_id, company.employees.len());
        Ok(())
    }

    /// Authorize, plan and commit a change set against the company as it was
    /// read. The batch expects that same snapshot, so a write that landed in
    /// between fails as a conflict instead of being overwritten.
    async fn apply(
        &self,
        requester: &Requester,
        id: Uuid,
        (current, company): (Document, Company),
        changes: Document,
    ) -> ServiceResult<Document> {
        self.enforcer.authorize(&company, requester)?;
        let plan = self.enforcer.plan_company_write(Some(&current), changes).await?;
        let (hired, released) = (plan.hires.len(), plan.releases.len());

        let updated = self.commit(Self::update_ops(id, plan)?).await?;
        if hired + released > 0 {
            info!("Company {} updated by {}: {} hired, {} released", id, requester.user_id, hired, released);
        }
        Ok(updated)
    }

    fn update_ops(id: Uuid, plan: CompanyPlan) -> ServiceResult<Vec<WriteOp>> {
        let mut ops: Vec<WriteOp> = plan
            .expectations
            .into_iter()
            .map(|(field, value)| WriteOp::expect(SCHEMA.collection, id, &field, value))
            .collect();
        ops.extend(plan.hires.iter().map(|u| WriteOp::claim(EMPLOYMENT, *u, id)));
        ops.push(WriteOp::update(SCHEMA.collection, id, plan.changes));
        ops.extend(plan.hires.iter().map(|u| set_employer(*u, id_value(id))));
        ops.extend(release_ops(id, &plan.releases)?);
        Ok(ops)
    }

    /// The company document is the first one the batch writes.
    async fn commit(&self, ops: Vec<WriteOp>) -> ServiceResult<Document> {
        let written = self.store.transact(ops).await.map_err(commit_error)?;
        written.into_iter().next().ok_or_else(|| ServiceError::not_found(SCHEMA.entity))
    }
}

/// Release claims, clear `users.company` and drop the users from the
/// company's project teams.
fn release_ops(company_id: Uuid, users: &[Uuid]) -> ServiceResult<Vec<WriteOp>> {
    if users.is_empty() {
        return Ok(vec![]);
    }
    let mut ops: Vec<WriteOp> = users.iter().map(|u| WriteOp::release(EMPLOYMENT, *u, company_id)).collect();
    ops.extend(users.iter().map(|u| set_employer(*u, Value::Null)));
    ops.push(WriteOp::Pull {
        collection: "projects".to_string(),
        filter: Filter::eq("company", id_value(company_id))?,
        field: "team".to_string(),
        values: id_values(users),
    });
    Ok(ops)
}

fn set_employer(user_id: Uuid, company: Value) -> WriteOp {
    let mut changes = Document::new();
    changes.insert("company".to_string(), company);
    WriteOp::update("users", user_id, changes)
}

fn employees_change(employees: &[Uuid]) -> Document {
    let mut changes = Document::new();
    changes.insert("employees".to_string(), Value::Array(id_values(employees)));
    changes
}
