use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::models::{CREATED_AT_FIELD, ID_FIELD};
use super::store::StoreError;

/// A stored document: a JSON object carrying `_id` and `createdAt`.
pub type Document = Map<String, Value>;

/// Timestamp format used for `createdAt`. Fixed precision keeps lexical and
/// chronological order identical.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Assign system fields to a new document. Any caller-supplied `_id` or
/// `createdAt` is replaced.
pub fn with_system_fields(fields: Document) -> Document {
    stamp(fields, Uuid::new_v4())
}

/// Like [`with_system_fields`] for callers that pick the id up front.
pub fn stamp(mut fields: Document, id: Uuid) -> Document {
    fields.insert(ID_FIELD.to_string(), id_value(id));
    fields.insert(CREATED_AT_FIELD.to_string(), Value::String(timestamp_now()));
    fields
}

pub fn document_id(doc: &Document) -> Option<Uuid> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Merge `changes` into `doc`; `null` removes the field. System fields are
/// never overwritten.
pub fn apply_changes(doc: &mut Document, changes: &Document) {
    for (key, value) in changes {
        if key == ID_FIELD || key == CREATED_AT_FIELD {
            continue;
        }
        if value.is_null() {
            doc.remove(key);
        } else {
            doc.insert(key.clone(), value.clone());
        }
    }
}

/// Remove every value in `values` from the array stored under `field`.
/// Returns true when the document changed.
pub fn pull_values(doc: &mut Document, field: &str, values: &[Value]) -> bool {
    match doc.get_mut(field) {
        Some(Value::Array(items)) => {
            let before = items.len();
            items.retain(|item| !values.contains(item));
            items.len() != before
        }
        _ => false,
    }
}

/// Include-only projection. `_id` is always kept.
pub fn project(doc: &Document, fields: &[String]) -> Document {
    let mut out = Map::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

/// Decode a stored document into a typed model.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Decode(e.to_string()))
}

pub fn id_value(id: Uuid) -> Value {
    Value::String(id.to_string())
}

pub fn id_values(ids: &[Uuid]) -> Vec<Value> {
    ids.iter().copied().map(id_value).collect()
}

/// Read a list of ids stored as strings. Unparseable entries are skipped.
pub fn ids_of(value: Option<&Value>) -> Vec<Uuid> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect(),
        _ => vec![],
    }
}
