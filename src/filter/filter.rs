use serde_json::{Map, Value};

use super::error::FilterError;
use super::eval;
use super::types::{FilterOp, FilterWhereInfo};
use crate::database::document::Document;

/// Conjunction of field conditions, the store-facing filter expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<FilterWhereInfo>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{ field: value }`
    pub fn eq(field: impl Into<String>, value: Value) -> Result<Self, FilterError> {
        let mut filter = Self::new();
        filter.push(field, FilterOp::Eq, value)?;
        Ok(filter)
    }

    /// `{ field: { $in: values } }`
    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Result<Self, FilterError> {
        let mut filter = Self::new();
        filter.push(field, FilterOp::In, Value::Array(values))?;
        Ok(filter)
    }

    pub fn push(&mut self, field: impl Into<String>, operator: FilterOp, data: Value) -> Result<&mut Self, FilterError> {
        let column = field.into();
        validate_column(&column)?;
        self.conditions.push(FilterWhereInfo { column, operator, data });
        Ok(self)
    }

    /// Combine two filters into one conjunction.
    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn conditions(&self) -> &[FilterWhereInfo] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| eval::matches_condition(doc, c))
    }

    /// Render the filter in the store's native JSON syntax, e.g.
    /// `{"price": {"$gte": 10}, "status": "OPEN"}`. Equality is written as a
    /// bare value when it is the only condition on the field.
    pub fn to_document(&self) -> Value {
        let mut out = Map::new();
        for condition in &self.conditions {
            let entry = out.entry(condition.column.clone()).or_insert(Value::Null);
            if condition.operator == FilterOp::Eq && entry.is_null() {
                *entry = condition.data.clone();
                continue;
            }
            if !is_operator_object(entry) {
                let previous = std::mem::take(entry);
                let mut ops = Map::new();
                if !previous.is_null() {
                    ops.insert("$eq".to_string(), previous);
                }
                *entry = Value::Object(ops);
            }
            if let Value::Object(ops) = entry {
                ops.insert(condition.operator.as_store_key().to_string(), condition.data.clone());
            }
        }
        Value::Object(out)
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Field names end up inside generated SQL, so only plain identifiers pass.
pub fn validate_column(column: &str) -> Result<(), FilterError> {
    let mut chars = column.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(FilterError::InvalidColumn(column.to_string()));
    }
    Ok(())
}
