use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Number, Value};
use uuid::Uuid;

use super::error::FilterError;
use super::filter::{validate_column, Filter};
use super::filter_order::FilterOrder;
use super::types::{FilterOp, FilterOrderInfo};
use crate::database::models::{FieldKind, Schema};

/// Keys that shape the response rather than filter documents.
pub const CONTROL_KEYS: &[&str] = &["select", "sort", "page", "limit"];

/// Decode a raw query string into ordered key/value pairs. Repeated keys are
/// kept.
pub fn parse_query_string(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// A list request's query string, split into filter and shaping options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub filter: Filter,
    pub select: Option<Vec<String>>,
    pub sort: Option<Vec<FilterOrderInfo>>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl QueryParams {
    pub fn parse(params: &[(String, String)], schema: Option<&Schema>) -> Result<Self, FilterError> {
        let mut out = QueryParams {
            filter: translate(params, schema)?,
            ..Default::default()
        };
        for (key, value) in params {
            match key.as_str() {
                "select" => out.select = parse_select(value, schema)?,
                "sort" => {
                    let infos = FilterOrder::parse(value, schema)?;
                    out.sort = if infos.is_empty() { None } else { Some(infos) };
                }
                "page" => out.page = Some(value.clone()),
                "limit" => out.limit = Some(value.clone()),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Translate query-string pairs into a store filter.
///
/// Control keys are skipped. `field[gt|gte|lt|lte|in]=value` becomes the
/// matching store operator, anything else is equality; repeating a plain key
/// turns it into a set match. With a schema, keys must be declared fields and
/// values are coerced to the field's kind. Without one, values stay strings
/// and unknown keys simply match nothing.
pub fn translate(params: &[(String, String)], schema: Option<&Schema>) -> Result<Filter, FilterError> {
    let mut equalities: Vec<(String, Vec<Value>)> = Vec::new();
    let mut sets: Vec<(String, Vec<Value>)> = Vec::new();
    let mut filter = Filter::new();

    for (key, raw) in params {
        if CONTROL_KEYS.contains(&key.as_str()) {
            continue;
        }
        let (field, op) = split_operator(key)?;
        let kind = field_kind(&field, schema)?;

        match op {
            FilterOp::Eq => {
                let value = coerce(&field, raw, kind)?;
                accumulate(&mut equalities, field, vec![value]);
            }
            FilterOp::In => {
                let values = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| coerce(&field, s, kind))
                    .collect::<Result<Vec<_>, _>>()?;
                accumulate(&mut sets, field, values);
            }
            range => {
                let value = coerce(&field, raw, kind)?;
                filter.push(field, range, value)?;
            }
        }
    }

    for (field, mut values) in equalities {
        if values.len() == 1 {
            filter.push(field, FilterOp::Eq, values.remove(0))?;
        } else {
            filter.push(field, FilterOp::In, Value::Array(values))?;
        }
    }
    for (field, values) in sets {
        filter.push(field, FilterOp::In, Value::Array(values))?;
    }
    Ok(filter)
}

fn accumulate(groups: &mut Vec<(String, Vec<Value>)>, field: String, values: Vec<Value>) {
    match groups.iter_mut().find(|(f, _)| *f == field) {
        Some((_, existing)) => existing.extend(values),
        None => groups.push((field, values)),
    }
}

fn split_operator(key: &str) -> Result<(String, FilterOp), FilterError> {
    match key.strip_suffix(']').and_then(|k| k.split_once('[')) {
        Some((field, op)) => {
            let op = FilterOp::from_shorthand(op).ok_or_else(|| FilterError::UnsupportedOperator(op.to_string()))?;
            Ok((field.to_string(), op))
        }
        None => Ok((key.to_string(), FilterOp::Eq)),
    }
}

fn field_kind(field: &str, schema: Option<&Schema>) -> Result<Option<FieldKind>, FilterError> {
    validate_column(field)?;
    match schema {
        Some(schema) => schema
            .field(field)
            .map(|f| Some(f.kind))
            .ok_or_else(|| FilterError::UnknownField {
                collection: schema.collection.to_string(),
                field: field.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_select(value: &str, schema: Option<&Schema>) -> Result<Option<Vec<String>>, FilterError> {
    let mut fields = Vec::new();
    for field in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        field_kind(field, schema)?;
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }
    Ok(if fields.is_empty() { None } else { Some(fields) })
}

/// Coerce a raw query-string value into the JSON type stored for `kind`.
pub fn coerce(field: &str, raw: &str, kind: Option<FieldKind>) -> Result<Value, FilterError> {
    let invalid = || FilterError::InvalidValue { field: field.to_string(), value: raw.to_string() };
    let value = match kind {
        None | Some(FieldKind::String) => Value::String(raw.to_string()),
        Some(FieldKind::Number) => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::from(i)
            } else {
                let f = raw.parse::<f64>().map_err(|_| invalid())?;
                Value::Number(Number::from_f64(f).ok_or_else(invalid)?)
            }
        }
        Some(FieldKind::Boolean) => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        Some(FieldKind::Date) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                Value::String(dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true))
            } else if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
                Value::String(raw.to_string())
            } else {
                return Err(invalid());
            }
        }
        Some(FieldKind::Id) | Some(FieldKind::Ids) => {
            Value::String(Uuid::parse_str(raw).map_err(|_| invalid())?.to_string())
        }
        Some(FieldKind::Enum(members)) => {
            if !members.contains(&raw) {
                return Err(invalid());
            }
            Value::String(raw.to_string())
        }
    };
    Ok(value)
}
