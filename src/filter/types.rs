use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::Filter;

/// Comparison operators understood by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "$eq")] Eq,
    #[serde(rename = "$gt")] Gt,
    #[serde(rename = "$gte")] Gte,
    #[serde(rename = "$lt")] Lt,
    #[serde(rename = "$lte")] Lte,
    #[serde(rename = "$in")] In,
}

impl FilterOp {
    /// Maps the bracketed query-string shorthand (`price[gte]`) to an operator.
    pub fn from_shorthand(op: &str) -> Option<Self> {
        match op {
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }

    /// Native operator key, e.g. `$gte`.
    pub fn as_store_key(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::In => "$in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterWhereInfo {
    pub column: String,
    pub operator: FilterOp,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC NULLS FIRST",
            SortDirection::Desc => "DESC NULLS LAST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
}

/// Everything a store needs to answer a `find`.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Filter,
    pub projection: Option<Vec<String>>,
    pub sort: Vec<FilterOrderInfo>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
