use super::{Field, FieldKind, Relation, Schema};

pub static SCHEMA: Schema = Schema {
    collection: "services",
    entity: "Service",
    fields: &[
        Field::new("name", FieldKind::String),
        Field::new("description", FieldKind::String),
        Field::reference("company", FieldKind::Id, "companies"),
    ],
    populate: &[Relation { field: "company", collection: "companies", select: &["name"] }],
};
