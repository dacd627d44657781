use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid field name: {0}")]
    InvalidColumn(String),

    #[error("Unknown field '{field}' for {collection}")]
    UnknownField { collection: String, field: String },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid sort direction '{direction}' for '{field}'")]
    InvalidSortDirection { field: String, direction: String },
}

impl FilterError {
    /// Field the error refers to, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            FilterError::InvalidColumn(field) => Some(field),
            FilterError::UnknownField { field, .. } => Some(field),
            FilterError::InvalidValue { field, .. } => Some(field),
            FilterError::InvalidSortDirection { field, .. } => Some(field),
            FilterError::UnsupportedOperator(_) => None,
        }
    }
}
