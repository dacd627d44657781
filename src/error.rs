use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::database::StoreError;
use crate::filter::FilterError;
use crate::services::ServiceError;

/// Error returned by every handler, rendered as
/// `{ success: false, error: { code, message, field_errors? } }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Request body or query does not fit the entity schema.
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    /// A cross-entity rule rejected the write.
    InvariantViolation {
        message: String,
        field_errors: HashMap<String, String>,
    },
    InvalidJson(String),
    Unauthorized(String),
    NotFound(String),
    /// The write raced another one; the client may retry.
    Conflict(String),
    InternalServerError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::ValidationError { .. }
            | ApiError::InvariantViolation { .. }
            | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::ValidationError { message, .. } | ApiError::InvariantViolation { message, .. } => message,
            ApiError::BadRequest(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    fn field_errors(&self) -> Option<&HashMap<String, String>> {
        match self {
            ApiError::ValidationError { field_errors, .. } => field_errors.as_ref(),
            ApiError::InvariantViolation { field_errors, .. } => Some(field_errors),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut error = json!({ "code": self.error_code(), "message": self.message() });
        if let Some(field_errors) = self.field_errors() {
            error["field_errors"] = json!(field_errors);
        }
        json!({ "success": false, "error": error })
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError { message: message.into(), field_errors }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        match err.field() {
            Some(field) => {
                let field_errors = HashMap::from([(field.to_string(), err.to_string())]);
                ApiError::validation_error(err.to_string(), Some(field_errors))
            }
            None => ApiError::bad_request(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                ApiError::service_unavailable("Document store unavailable")
            }
            StoreError::Sqlx(sqlx::Error::PoolTimedOut) | StoreError::Sqlx(sqlx::Error::Io(_)) => {
                tracing::error!("Store connection error: {}", err);
                ApiError::service_unavailable("Document store unavailable")
            }
            StoreError::NotFound { .. } => ApiError::not_found("Document not found"),
            StoreError::Filter(e) => e.into(),
            StoreError::StaleWrite { .. } => ApiError::conflict("Document was modified concurrently, retry the request"),
            other => {
                tracing::error!("Store error: {}", other);
                ApiError::internal_server_error("Query failed")
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::not_found(msg),
            ServiceError::Unauthorized(msg) => ApiError::unauthorized(msg),
            ServiceError::InvariantViolation { message, field_errors } => {
                tracing::warn!("Write rejected: {}", message);
                ApiError::InvariantViolation { message, field_errors }
            }
            ServiceError::Validation { message, field_errors } => {
                ApiError::validation_error(message, Some(field_errors))
            }
            ServiceError::Conflict(msg) => ApiError::conflict(msg),
            ServiceError::Filter(e) => e.into(),
            ServiceError::Store(e) => e.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}
