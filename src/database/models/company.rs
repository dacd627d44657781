use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Field, FieldKind, Relation, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Paid tiers may carry an assigned representative.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::Free)
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Free
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Trial,
    Onboarding,
    Active,
    PastDue,
    Cancelled,
    Churned,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        SubscriptionStatus::Trial
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub employees: Vec<Uuid>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub subscription_status: SubscriptionStatus,
    #[serde(default)]
    pub assigned_representative: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Company {
    pub fn employs(&self, user_id: Uuid) -> bool {
        self.employees.contains(&user_id)
    }
}

pub static SCHEMA: Schema = Schema {
    collection: "companies",
    entity: "Company",
    fields: &[
        Field::new("name", FieldKind::String),
        Field::reference("employees", FieldKind::Ids, "users"),
        Field::new("tier", FieldKind::Enum(&["FREE", "PRO", "ENTERPRISE"])),
        Field::new(
            "subscriptionStatus",
            FieldKind::Enum(&["TRIAL", "ONBOARDING", "ACTIVE", "PAST_DUE", "CANCELLED", "CHURNED"]),
        ),
        Field::reference("assignedRepresentative", FieldKind::Id, "users"),
    ],
    populate: &[Relation {
        field: "assignedRepresentative",
        collection: "users",
        select: &["name", "email"],
    }],
};
