use super::error::FilterError;
use super::filter::validate_column;
use super::types::{FilterOrderInfo, SortDirection};
use crate::database::models::{Schema, ID_FIELD};

pub struct FilterOrder;

impl FilterOrder {
    /// Parse `field:asc|desc[,field2:dir]`. A bare field sorts ascending.
    /// With a schema, every field must be declared.
    pub fn parse(spec: &str, schema: Option<&Schema>) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in spec.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (column, direction) = match trimmed.split_once(':') {
                Some((column, direction)) => (column.trim(), direction.trim()),
                None => (trimmed, "asc"),
            };
            validate_column(column)?;
            if let Some(schema) = schema {
                if schema.field(column).is_none() {
                    return Err(FilterError::UnknownField {
                        collection: schema.collection.to_string(),
                        field: column.to_string(),
                    });
                }
            }
            let sort = if direction.eq_ignore_ascii_case("asc") {
                SortDirection::Asc
            } else if direction.eq_ignore_ascii_case("desc") {
                SortDirection::Desc
            } else {
                return Err(FilterError::InvalidSortDirection {
                    field: column.to_string(),
                    direction: direction.to_string(),
                });
            };
            out.push(FilterOrderInfo { column: column.to_string(), sort });
        }
        Ok(out)
    }

    /// ORDER BY over the JSONB `data` column, always ending with `_id` so
    /// that offsets are stable between pages.
    pub fn generate(infos: &[FilterOrderInfo]) -> Result<String, FilterError> {
        let mut parts = Vec::with_capacity(infos.len() + 1);
        for info in infos {
            validate_column(&info.column)?;
            parts.push(format!("data -> '{}' {}", info.column, info.sort.to_sql()));
        }
        parts.push(format!("data -> '{}' ASC", ID_FIELD));
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::schema_for;

    #[test]
    fn parses_multi_key_sort() {
        let infos = FilterOrder::parse("priority:desc, createdAt:asc,title", None).unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0], FilterOrderInfo { column: "priority".into(), sort: SortDirection::Desc });
        assert_eq!(infos[1].sort, SortDirection::Asc);
        assert_eq!(infos[2], FilterOrderInfo { column: "title".into(), sort: SortDirection::Asc });
    }

    #[test]
    fn rejects_bad_direction_and_unknown_fields() {
        assert!(matches!(
            FilterOrder::parse("priority:sideways", None),
            Err(FilterError::InvalidSortDirection { .. })
        ));
        let tickets = schema_for("tickets").unwrap();
        assert!(matches!(
            FilterOrder::parse("salary:desc", Some(tickets)),
            Err(FilterError::UnknownField { .. })
        ));
        assert!(FilterOrder::parse("priority:DESC", Some(tickets)).is_ok());
    }

    #[test]
    fn generates_jsonb_order_by_with_tie_break() {
        let infos = FilterOrder::parse("priority:desc", None).unwrap();
        assert_eq!(
            FilterOrder::generate(&infos).unwrap(),
            "ORDER BY data -> 'priority' DESC NULLS LAST, data -> '_id' ASC"
        );
    }
}
