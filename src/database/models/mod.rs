pub mod comment;
pub mod company;
pub mod project;
pub mod service;
pub mod ticket;
pub mod user;

pub use company::{Company, SubscriptionStatus, Tier};
pub use project::Project;
pub use user::{Role, User};

/// Field kinds used for query-string coercion and write validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    /// Single document reference.
    Id,
    /// List of document references.
    Ids,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Collection an `Id`/`Ids` field points at.
    pub references: Option<&'static str>,
    /// Maintained by a dedicated write path; rejected on generic writes.
    pub managed: bool,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind, references: None, managed: false }
    }

    pub const fn reference(name: &'static str, kind: FieldKind, collection: &'static str) -> Self {
        Self { name, kind, references: Some(collection), managed: false }
    }

    pub const fn managed(mut self) -> Self {
        self.managed = true;
        self
    }
}

/// Relation resolved into embedded documents on reads.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub field: &'static str,
    pub collection: &'static str,
    pub select: &'static [&'static str],
}

#[derive(Debug)]
pub struct Schema {
    pub collection: &'static str,
    /// Singular display name used in error messages ("Company not found").
    pub entity: &'static str,
    pub fields: &'static [Field],
    pub populate: &'static [Relation],
}

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "createdAt";

const SYSTEM_FIELDS: &[Field] = &[
    Field::new(ID_FIELD, FieldKind::Id),
    Field::new(CREATED_AT_FIELD, FieldKind::Date),
];

impl Schema {
    /// Looks up a declared or system field.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .chain(SYSTEM_FIELDS.iter())
            .find(|f| f.name == name)
    }

    pub fn is_system_field(name: &str) -> bool {
        SYSTEM_FIELDS.iter().any(|f| f.name == name)
    }
}

pub static SCHEMAS: &[&Schema] = &[
    &user::SCHEMA,
    &company::SCHEMA,
    &project::SCHEMA,
    &service::SCHEMA,
    &ticket::SCHEMA,
    &comment::SCHEMA,
];

/// Resolve a resource path segment (`/api/v1/:resource`) to its schema.
pub fn schema_for(collection: &str) -> Option<&'static Schema> {
    SCHEMAS.iter().copied().find(|s| s.collection == collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_collections() {
        for name in ["users", "companies", "projects", "services", "tickets", "comments"] {
            assert!(schema_for(name).is_some(), "missing schema for {}", name);
        }
        assert!(schema_for("invoices").is_none());
    }

    #[test]
    fn system_fields_are_available_on_every_schema() {
        for schema in SCHEMAS {
            assert_eq!(schema.field("_id").map(|f| f.kind), Some(FieldKind::Id));
            assert_eq!(schema.field("createdAt").map(|f| f.kind), Some(FieldKind::Date));
        }
    }

    #[test]
    fn relations_point_at_declared_reference_fields() {
        for schema in SCHEMAS {
            for rel in schema.populate {
                let field = schema.field(rel.field).expect("relation field declared");
                assert_eq!(field.references, Some(rel.collection));
                assert!(schema_for(rel.collection).is_some());
            }
        }
    }
}
