use super::{Field, FieldKind, Relation, Schema};

pub static SCHEMA: Schema = Schema {
    collection: "comments",
    entity: "Comment",
    fields: &[
        Field::reference("ticket", FieldKind::Id, "tickets"),
        Field::reference("author", FieldKind::Id, "users"),
        Field::new("body", FieldKind::String),
    ],
    populate: &[Relation { field: "author", collection: "users", select: &["name"] }],
};
