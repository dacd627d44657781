use serde_json::Value;
use std::cmp::Ordering;

use super::types::{FilterOp, FilterOrderInfo, FilterWhereInfo, SortDirection};
use crate::database::document::Document;
use crate::database::models::ID_FIELD;

/// Evaluate one condition against a document with document-store semantics:
/// missing fields never match, equality against an array field matches when
/// the array contains the value, and ordering comparisons only match values
/// of the same type.
pub fn matches_condition(doc: &Document, condition: &FilterWhereInfo) -> bool {
    let Some(value) = doc.get(&condition.column) else {
        return false;
    };
    match condition.operator {
        FilterOp::Eq => equals(value, &condition.data),
        FilterOp::In => match &condition.data {
            Value::Array(set) => set.iter().any(|candidate| equals(value, candidate)),
            single => equals(value, single),
        },
        FilterOp::Gt => compare_same_type(value, &condition.data) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(compare_same_type(value, &condition.data), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => compare_same_type(value, &condition.data) == Some(Ordering::Less),
        FilterOp::Lte => matches!(compare_same_type(value, &condition.data), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn equals(value: &Value, expected: &Value) -> bool {
    if numbers_equal(value, expected) || value == expected {
        return true;
    }
    match value {
        Value::Array(items) if !expected.is_array() => items.iter().any(|item| equals(item, expected)),
        _ => false,
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => a.is_number() && b.is_number() && x == y,
        _ => false,
    }
}

fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Some(x.as_f64()?.total_cmp(&y.as_f64()?)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order across JSON values used for sorting: missing < null < bool <
/// number < string < array < object, then by value within a type.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_same_type(x, y).unwrap_or_else(|| type_rank(x).cmp(&type_rank(y))),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two documents by a multi-key sort, falling back to `_id` so the
/// order is total and pages never overlap.
pub fn compare_docs(a: &Document, b: &Document, sort: &[FilterOrderInfo]) -> Ordering {
    for spec in sort {
        let ord = compare_values(a.get(&spec.column), b.get(&spec.column));
        if ord != Ordering::Equal {
            return match spec.sort {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
        }
    }
    compare_values(a.get(ID_FIELD), b.get(ID_FIELD))
}
