use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::{Requester, ServiceError, ServiceResult};
use crate::database::document::{decode, document_id, id_value, id_values, ids_of, Document};
use crate::database::models::{schema_for, Company, Tier};
use crate::database::{DocumentStore, StoreError};
use crate::filter::{Filter, FindQuery};

/// Unique namespace mapping a user id to the company that employs them.
pub const EMPLOYMENT: &str = "employment";

const COMPANIES: &str = "companies";
const USERS: &str = "users";
const EMPLOYEES: &str = "employees";
const TIER: &str = "tier";
const REPRESENTATIVE: &str = "assignedRepresentative";

/// Outcome of validating a company write, ready to be committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyPlan {
    /// Field changes for the company document. May contain fields the caller
    /// did not send, such as a representative cleared by a downgrade.
    pub changes: Document,
    /// Users joining the company.
    pub hires: Vec<Uuid>,
    /// Users leaving the company.
    pub releases: Vec<Uuid>,
    /// Current values the plan was derived from; the commit aborts if any changed.
    pub expectations: Vec<(String, Value)>,
}

/// Validates cross-entity rules before a write commits.
pub struct InvariantEnforcer<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> InvariantEnforcer<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Load a company as both its stored document and its typed form.
    pub async fn load_company(&self, id: Uuid) -> ServiceResult<(Document, Company)> {
        let doc = self
            .store
            .find_by_id(COMPANIES, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Company"))?;
        let company = decode(doc.clone())?;
        Ok((doc, company))
    }

    /// Admins may write any company; everyone else only the one employing them.
    pub fn authorize(&self, company: &Company, requester: &Requester) -> ServiceResult<()> {
        if requester.is_admin() || company.employs(requester.user_id) {
            return Ok(());
        }
        warn!(
            "User {} ({:?}) is not authorized to modify company {}",
            requester.user_id, requester.role, company.id
        );
        Err(ServiceError::not_authorized())
    }

    /// Check a schema-validated change set against the tier and employment
    /// rules. `current` is the stored company, or `None` on create.
    pub async fn plan_company_write(&self, current: Option<&Document>, mut changes: Document) -> ServiceResult<CompanyPlan> {
        let company: Option<Company> = current.map(|doc| decode(doc.clone())).transpose()?;
        let mut plan = CompanyPlan::default();

        let tier_changed = changes.contains_key(TIER);
        let tier = match changes.get(TIER) {
            Some(Value::Null) => Tier::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| ServiceError::violation(TIER, format!("Unknown tier {}", value)))?,
            None => company.as_ref().map(|c| c.tier).unwrap_or_default(),
        };

        match changes.get(REPRESENTATIVE) {
            Some(Value::Null) => {}
            Some(value) => {
                if !tier.is_paid() {
                    return Err(ServiceError::violation(
                        REPRESENTATIVE,
                        "Assigned representative requires a PRO or ENTERPRISE tier",
                    ));
                }
                let rep = value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| ServiceError::violation(REPRESENTATIVE, "Invalid user id"))?;
                self.require_users(&[rep]).await?;
                if !tier_changed {
                    expect_current(&mut plan, current, TIER);
                }
            }
            None if !tier.is_paid() => {
                if company.as_ref().is_some_and(|c| c.assigned_representative.is_some()) {
                    changes.insert(REPRESENTATIVE.to_string(), Value::Null);
                } else {
                    expect_current(&mut plan, current, REPRESENTATIVE);
                }
            }
            None => {}
        }

        if let Some(value) = changes.get(EMPLOYEES) {
            let mut employees = Vec::new();
            for id in ids_of(Some(value)) {
                if !employees.contains(&id) {
                    employees.push(id);
                }
            }
            let existing = company.as_ref().map(|c| c.employees.clone()).unwrap_or_default();
            plan.hires = employees.iter().copied().filter(|id| !existing.contains(id)).collect();
            plan.releases = existing.iter().copied().filter(|id| !employees.contains(id)).collect();

            self.require_users(&plan.hires).await?;
            let company_id = company.as_ref().map(|c| c.id);
            for hire in &plan.hires {
                if self.employer_of(*hire, company_id).await?.is_some() {
                    return Err(already_employed(*hire));
                }
            }

            changes.insert(EMPLOYEES.to_string(), Value::Array(id_values(&employees)));
            expect_current(&mut plan, current, EMPLOYEES);
        }

        plan.changes = changes;
        Ok(plan)
    }

    /// Company, other than `excluding`, whose employees list `user_id`.
    pub async fn employer_of(&self, user_id: Uuid, excluding: Option<Uuid>) -> ServiceResult<Option<Uuid>> {
        let query = FindQuery {
            filter: Filter::eq(EMPLOYEES, id_value(user_id))?,
            projection: Some(vec![]),
            ..Default::default()
        };
        let employers = self.store.find(COMPANIES, &query).await?;
        Ok(employers
            .iter()
            .filter_map(document_id)
            .find(|id| Some(*id) != excluding))
    }

    /// Every team member must be an employee of the project's company.
    pub fn check_team(&self, company: &Company, team: &[Uuid]) -> ServiceResult<()> {
        let outsiders: Vec<Uuid> = team.iter().copied().filter(|id| !company.employs(*id)).collect();
        if outsiders.is_empty() {
            return Ok(());
        }
        Err(team_violation(&outsiders))
    }

    async fn require_users(&self, ids: &[Uuid]) -> ServiceResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.store.find_by_ids(USERS, ids).await?;
        if found.len() < ids.len() {
            return Err(ServiceError::not_found("User"));
        }
        Ok(())
    }
}

/// Translate a failed commit batch into the domain error it stands for.
pub fn commit_error(err: StoreError) -> ServiceError {
    match err {
        StoreError::UniqueViolation { namespace, key, .. } if namespace == EMPLOYMENT => {
            warn!("Employment claim for user {} lost to a concurrent write", key);
            already_employed(key)
        }
        StoreError::GuardFailed { collection, field, missing, .. } if collection == COMPANIES && field == EMPLOYEES => {
            let outsiders: Vec<Uuid> = ids_of(Some(&Value::Array(missing)));
            team_violation(&outsiders)
        }
        StoreError::StaleWrite { collection, id, field } => {
            warn!("Write to {}/{} aborted, {} changed concurrently", collection, id, field);
            ServiceError::Conflict(format!("{} was modified concurrently, retry the request", entity_of(&collection)))
        }
        StoreError::NotFound { collection, .. } => ServiceError::not_found(entity_of(&collection)),
        other => ServiceError::Store(other),
    }
}

fn entity_of(collection: &str) -> &'static str {
    schema_for(collection).map(|s| s.entity).unwrap_or("Document")
}

fn already_employed(user_id: Uuid) -> ServiceError {
    ServiceError::violation(
        EMPLOYEES,
        format!("User {} is already listed as employee of an existing company", user_id),
    )
}

fn team_violation(outsiders: &[Uuid]) -> ServiceError {
    let field_errors: HashMap<String, String> = outsiders
        .iter()
        .map(|id| (format!("team.{}", id), format!("User {} is not an employee of the project's company", id)))
        .collect();
    ServiceError::InvariantViolation {
        message: "Team members must be employees of the project's company".to_string(),
        field_errors,
    }
}

fn expect_current(plan: &mut CompanyPlan, current: Option<&Document>, field: &str) {
    if let Some(doc) = current {
        let value = doc.get(field).cloned().unwrap_or(Value::Null);
        plan.expectations.push((field.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::document::with_system_fields;
    use crate::database::models::Role;
    use crate::database::MemoryStore;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    async fn user(store: &MemoryStore, name: &str) -> Uuid {
        let created = store
            .create("users", with_system_fields(doc(json!({ "name": name, "role": "STAFF" }))))
            .await
            .unwrap();
        document_id(&created).unwrap()
    }

    async fn company(store: &MemoryStore, fields: Value) -> Document {
        store.create("companies", with_system_fields(doc(fields))).await.unwrap()
    }

    #[tokio::test]
    async fn free_tier_rejects_representative() {
        let store = MemoryStore::new();
        let rep = user(&store, "Rita").await;
        let enforcer = InvariantEnforcer::new(&store);
        let err = enforcer
            .plan_company_write(None, doc(json!({ "tier": "FREE", "assignedRepresentative": rep.to_string() })))
            .await
            .unwrap_err();
        match err {
            ServiceError::InvariantViolation { field_errors, .. } => {
                assert!(field_errors.contains_key("assignedRepresentative"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn paid_tier_accepts_representative_and_guards_tier() {
        let store = MemoryStore::new();
        let rep = user(&store, "Rita").await;
        let current = company(&store, json!({ "name": "Acme", "tier": "PRO" })).await;
        let plan = InvariantEnforcer::new(&store)
            .plan_company_write(Some(&current), doc(json!({ "assignedRepresentative": rep.to_string() })))
            .await
            .unwrap();
        assert_eq!(plan.changes["assignedRepresentative"], json!(rep.to_string()));
        assert_eq!(plan.expectations, vec![("tier".to_string(), json!("PRO"))]);
    }

    #[tokio::test]
    async fn downgrade_clears_representative() {
        let store = MemoryStore::new();
        let rep = user(&store, "Rita").await;
        let current = company(&store, json!({ "tier": "ENTERPRISE", "assignedRepresentative": rep.to_string() })).await;
        let plan = InvariantEnforcer::new(&store)
            .plan_company_write(Some(&current), doc(json!({ "tier": "FREE" })))
            .await
            .unwrap();
        assert_eq!(plan.changes["assignedRepresentative"], Value::Null);
    }

    #[tokio::test]
    async fn representative_must_exist() {
        let store = MemoryStore::new();
        let err = InvariantEnforcer::new(&store)
            .plan_company_write(None, doc(json!({ "tier": "PRO", "assignedRepresentative": Uuid::new_v4().to_string() })))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(msg) if msg == "User not found"));
    }

    #[tokio::test]
    async fn employee_of_another_company_is_rejected() {
        let store = MemoryStore::new();
        let u1 = user(&store, "U1").await;
        company(&store, json!({ "name": "A", "employees": [u1.to_string()] })).await;
        let b = company(&store, json!({ "name": "B", "employees": [] })).await;

        let err = InvariantEnforcer::new(&store)
            .plan_company_write(Some(&b), doc(json!({ "employees": [u1.to_string()] })))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("User {} is already listed as employee of an existing company", u1)
        );
    }

    #[tokio::test]
    async fn employee_diff_is_deduplicated() {
        let store = MemoryStore::new();
        let (u1, u2, u3) = (user(&store, "U1").await, user(&store, "U2").await, user(&store, "U3").await);
        let current = company(&store, json!({ "employees": [u1.to_string(), u2.to_string()] })).await;
        let plan = InvariantEnforcer::new(&store)
            .plan_company_write(
                Some(&current),
                doc(json!({ "employees": [u2.to_string(), u3.to_string(), u3.to_string()] })),
            )
            .await
            .unwrap();
        assert_eq!(plan.hires, vec![u3]);
        assert_eq!(plan.releases, vec![u1]);
        assert_eq!(plan.changes["employees"], json!([u2.to_string(), u3.to_string()]));
        assert_eq!(plan.expectations[0].0, "employees");
    }

    #[tokio::test]
    async fn authorization_allows_admins_and_employees_only() {
        let store = MemoryStore::new();
        let employee = Uuid::new_v4();
        let acme: Company = decode(company(&store, json!({ "employees": [employee.to_string()] })).await).unwrap();
        let enforcer = InvariantEnforcer::new(&store);

        let staff = Requester { user_id: Uuid::new_v4(), role: Role::Staff };
        assert!(matches!(enforcer.authorize(&acme, &staff), Err(ServiceError::Unauthorized(_))));
        let admin = Requester { user_id: Uuid::new_v4(), role: Role::Admin };
        assert!(enforcer.authorize(&acme, &admin).is_ok());
        let member = Requester { user_id: employee, role: Role::Client };
        assert!(enforcer.authorize(&acme, &member).is_ok());
    }

    #[tokio::test]
    async fn team_outsiders_are_reported_per_member() {
        let store = MemoryStore::new();
        let (inside, outside) = (Uuid::new_v4(), Uuid::new_v4());
        let acme: Company = decode(company(&store, json!({ "employees": [inside.to_string()] })).await).unwrap();
        let enforcer = InvariantEnforcer::new(&store);

        assert!(enforcer.check_team(&acme, &[inside]).is_ok());
        match enforcer.check_team(&acme, &[inside, outside]) {
            Err(ServiceError::InvariantViolation { field_errors, .. }) => {
                assert_eq!(field_errors.len(), 1);
                assert!(field_errors.contains_key(&format!("team.{}", outside)));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn commit_errors_map_to_domain_errors() {
        let key = Uuid::new_v4();
        let err = commit_error(StoreError::UniqueViolation {
            namespace: EMPLOYMENT.to_string(),
            key,
            owner: Uuid::new_v4(),
        });
        assert!(matches!(err, ServiceError::InvariantViolation { .. }));

        let err = commit_error(StoreError::StaleWrite {
            collection: "companies".into(),
            id: Uuid::new_v4(),
            field: "employees".into(),
        });
        assert!(matches!(err, ServiceError::Conflict(msg) if msg.starts_with("Company")));
    }
}
