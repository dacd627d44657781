//! HTTP handlers for `/api/v1`. Every route here runs behind the identity
//! middleware, so an [`AuthUser`](crate::middleware::AuthUser) extension is
//! always present.

pub mod companies;
pub mod resources;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;

/// Parse a path segment as a document id.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("Invalid id '{}'", raw)))
}

/// Unwrap a JSON body, turning axum's rejection into our error envelope.
pub(crate) fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError::invalid_json(rejection.body_text())),
    }
}
