use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;
use crate::services::ListEnvelope;

/// Single-document payload rendered as `{ success: true, data }`.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { data, status: StatusCode::OK }
    }

    pub fn created(data: T) -> Self {
        Self { data, status: StatusCode::CREATED }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match serde_json::to_value(&self.data) {
            Ok(data) => (self.status, Json(json!({ "success": true, "data": data }))).into_response(),
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                serialization_failure()
            }
        }
    }
}

/// List responses already carry their own envelope.
impl IntoResponse for ListEnvelope {
    fn into_response(self) -> Response {
        match serde_json::to_value(&self) {
            Ok(body) => (StatusCode::OK, Json(body)).into_response(),
            Err(e) => {
                tracing::error!("Failed to serialize list envelope: {}", e);
                serialization_failure()
            }
        }
    }
}

fn serialization_failure() -> Response {
    ApiError::internal_server_error("Failed to serialize response data").into_response()
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;
