use axum::{
    extract::{rejection::JsonRejection, Extension, Path, RawQuery, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::app::AppState;
use crate::database::Document;
use crate::error::ApiError;
use crate::filter::parse_query_string;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::{ListEnvelope, ResourceService};

use super::{json_body, parse_id};

/// GET /api/v1/:resource - filtered, sorted, paginated and populated list
pub async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<ListEnvelope, ApiError> {
    let params = parse_query_string(query.as_deref().unwrap_or(""));
    let service = ResourceService::new(state.store.as_ref(), &state.config.query);
    Ok(service.list(&resource, &params).await?)
}

/// GET /api/v1/:resource/:id
pub async fn get(State(state): State<AppState>, Path((resource, id)): Path<(String, String)>) -> ApiResult<Document> {
    let id = parse_id(&id)?;
    let service = ResourceService::new(state.store.as_ref(), &state.config.query);
    Ok(ApiResponse::success(service.get(&resource, id).await?))
}

/// POST /api/v1/:resource
pub async fn create(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Document> {
    let body = json_body(payload)?;
    let service = ResourceService::new(state.store.as_ref(), &state.config.query);
    let created = service.create(&auth_user.requester(), &resource, body).await?;
    Ok(ApiResponse::created(created))
}

/// PATCH /api/v1/:resource/:id - partial update
pub async fn update(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Extension(auth_user): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Document> {
    let id = parse_id(&id)?;
    let body = json_body(payload)?;
    let service = ResourceService::new(state.store.as_ref(), &state.config.query);
    let updated = service.update(&auth_user.requester(), &resource, id, body).await?;
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/v1/:resource/:id
pub async fn delete(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let service = ResourceService::new(state.store.as_ref(), &state.config.query);
    service.delete(&auth_user.requester(), &resource, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
