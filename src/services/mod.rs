pub mod companies;
pub mod invariants;
pub mod projects;
pub mod resources;
pub mod results;

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::Role;
use crate::database::StoreError;
use crate::filter::FilterError;

pub use companies::CompanyService;
pub use invariants::InvariantEnforcer;
pub use projects::ProjectService;
pub use resources::ResourceService;
pub use results::{ListEnvelope, ResultAssembler};

/// Identity a write is performed on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub role: Role,
}

impl Requester {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    /// A cross-entity business rule rejected the write.
    #[error("{message}")]
    InvariantViolation {
        message: String,
        field_errors: HashMap<String, String>,
    },

    /// The request body does not fit the entity schema.
    #[error("{message}")]
    Validation {
        message: String,
        field_errors: HashMap<String, String>,
    },

    /// The document changed between planning and committing the write.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// `"<Entity> not found"`
    pub fn not_found(entity: &str) -> Self {
        ServiceError::NotFound(format!("{} not found", entity))
    }

    pub fn not_authorized() -> Self {
        ServiceError::Unauthorized("Not Authorized".to_string())
    }

    pub fn violation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut field_errors = HashMap::new();
        field_errors.insert(field.into(), message.clone());
        ServiceError::InvariantViolation { message, field_errors }
    }

    pub fn validation(field_errors: HashMap<String, String>, entity: &str) -> Self {
        ServiceError::Validation {
            message: format!("Invalid {} fields", entity.to_lowercase()),
            field_errors,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
