use serde_json::Value;

use super::error::FilterError;
use super::filter::{validate_column, Filter};
use super::types::{FilterOp, FilterWhereInfo};

/// Compiles a [`Filter`] into a SQL predicate over the JSONB `data` column.
/// Every parameter is bound as `jsonb`.
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    /// Returns the predicate and its parameters; `$n` placeholders start after
    /// `starting_param_index`.
    pub fn generate(filter: &Filter, starting_param_index: usize) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        let mut sql_conditions = vec![];
        for condition in filter.conditions() {
            sql_conditions.push(filter_where.build_sql_condition(condition)?);
        }
        let where_clause = if sql_conditions.is_empty() { "TRUE".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, filter_where.param_values))
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        validate_column(&condition.column)?;
        let field = format!("data -> '{}'", condition.column);
        Ok(match condition.operator {
            FilterOp::Eq => {
                let p = self.param(condition.data.clone());
                Self::equality(&field, &p)
            }
            FilterOp::Gt => self.ordered(&field, ">", &condition.data),
            FilterOp::Gte => self.ordered(&field, ">=", &condition.data),
            FilterOp::Lt => self.ordered(&field, "<", &condition.data),
            FilterOp::Lte => self.ordered(&field, "<=", &condition.data),
            FilterOp::In => {
                let values = match &condition.data {
                    Value::Array(values) => values.clone(),
                    single => vec![single.clone()],
                };
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let p = self.param(Value::Array(values));
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements({p}) AS candidate WHERE {})",
                    Self::equality(&field, "candidate")
                )
            }
        })
    }

    /// Equality with array-contains semantics for array-valued fields.
    fn equality(field: &str, value: &str) -> String {
        format!(
            "({field} = {value} OR (jsonb_typeof({field}) = 'array' AND {field} @> jsonb_build_array({value})))"
        )
    }

    fn ordered(&mut self, field: &str, op: &str, data: &Value) -> String {
        let p = self.param(data.clone());
        format!("(jsonb_typeof({field}) = jsonb_typeof({p}) AND {field} {op} {p})")
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}::jsonb", self.param_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_is_true() {
        let (sql, params) = FilterWhere::generate(&Filter::new(), 1).unwrap();
        assert_eq!(sql, "TRUE");
        assert!(params.is_empty());
    }

    #[test]
    fn numbers_parameters_after_offset() {
        let mut f = Filter::new();
        f.push("status", FilterOp::In, json!(["OPEN", "IN_PROGRESS"])).unwrap();
        f.push("priority", FilterOp::Gte, json!(3)).unwrap();
        let (sql, params) = FilterWhere::generate(&f, 1).unwrap();
        assert!(sql.contains("jsonb_array_elements($2::jsonb)"));
        assert!(sql.contains("data -> 'priority' >= $3::jsonb"));
        assert_eq!(params, vec![json!(["OPEN", "IN_PROGRESS"]), json!(3)]);
    }

    #[test]
    fn empty_in_set_matches_nothing() {
        let f = Filter::any_of("status", vec![]).unwrap();
        let (sql, params) = FilterWhere::generate(&f, 0).unwrap();
        assert_eq!(sql, "FALSE");
        assert!(params.is_empty());
    }
}
