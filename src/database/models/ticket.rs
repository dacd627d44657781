use super::{Field, FieldKind, Relation, Schema};

pub static SCHEMA: Schema = Schema {
    collection: "tickets",
    entity: "Ticket",
    fields: &[
        Field::new("title", FieldKind::String),
        Field::new("description", FieldKind::String),
        Field::new("status", FieldKind::Enum(&["OPEN", "IN_PROGRESS", "RESOLVED", "CLOSED"])),
        Field::new("priority", FieldKind::Number),
        Field::reference("project", FieldKind::Id, "projects"),
        Field::reference("service", FieldKind::Id, "services"),
        Field::reference("assignee", FieldKind::Id, "users"),
        Field::reference("createdBy", FieldKind::Id, "users"),
    ],
    populate: &[
        Relation { field: "project", collection: "projects", select: &["name"] },
        Relation { field: "assignee", collection: "users", select: &["name", "email"] },
    ],
};
