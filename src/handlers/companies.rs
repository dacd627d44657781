use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::app::AppState;
use crate::database::Document;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::CompanyService;

use super::{json_body, parse_id};

#[derive(Debug, Deserialize)]
pub struct HireRequest {
    pub user: String,
}

/// POST /api/v1/companies/:id/employees - hire one user
pub async fn add_employee(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Document> {
    require_companies(&resource)?;
    let id = parse_id(&id)?;
    let request: HireRequest = serde_json::from_value(json_body(payload)?)
        .map_err(|e| ApiError::invalid_json(format!("Expected {{\"user\": \"<id>\"}}: {}", e)))?;
    let user_id = parse_id(&request.user)?;

    let company = CompanyService::new(state.store.as_ref())
        .add_employee(&auth_user.requester(), id, user_id)
        .await?;
    Ok(ApiResponse::success(company))
}

/// DELETE /api/v1/companies/:id/employees/:user_id - release one employee
pub async fn remove_employee(
    State(state): State<AppState>,
    Path((resource, id, user_id)): Path<(String, String, String)>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Document> {
    require_companies(&resource)?;
    let id = parse_id(&id)?;
    let user_id = parse_id(&user_id)?;

    let company = CompanyService::new(state.store.as_ref())
        .remove_employee(&auth_user.requester(), id, user_id)
        .await?;
    Ok(ApiResponse::success(company))
}

/// Employee routes share the generic `/:resource` prefix; only companies have them.
fn require_companies(resource: &str) -> Result<(), ApiError> {
    if resource == "companies" {
        Ok(())
    } else {
        Err(ApiError::not_found(format!("Unknown route for resource '{}'", resource)))
    }
}
