use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Field, FieldKind, Relation, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Client,
    Staff,
    Developer,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Client
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub company: Option<Uuid>,
    #[serde(default)]
    pub department: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

pub static SCHEMA: Schema = Schema {
    collection: "users",
    entity: "User",
    fields: &[
        Field::new("name", FieldKind::String),
        Field::new("email", FieldKind::String),
        Field::new(
            "role",
            FieldKind::Enum(&["CLIENT", "STAFF", "DEVELOPER", "ADMIN", "SUPER_ADMIN"]),
        ),
        Field::reference("company", FieldKind::Id, "companies").managed(),
        Field::new("department", FieldKind::String),
    ],
    populate: &[Relation {
        field: "company",
        collection: "companies",
        select: &["name", "tier"],
    }],
};
