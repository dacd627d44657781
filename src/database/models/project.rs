use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Field, FieldKind, Relation, Schema};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub company: Uuid,
    #[serde(default)]
    pub team: Vec<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

pub static SCHEMA: Schema = Schema {
    collection: "projects",
    entity: "Project",
    fields: &[
        Field::new("name", FieldKind::String),
        Field::new("description", FieldKind::String),
        Field::reference("company", FieldKind::Id, "companies"),
        Field::reference("team", FieldKind::Ids, "users"),
    ],
    populate: &[
        Relation { field: "company", collection: "companies", select: &["name"] },
        Relation { field: "team", collection: "users", select: &["name", "email", "role"] },
    ],
};
