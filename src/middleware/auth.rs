use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::validate_jwt;
use crate::database::document::decode;
use crate::database::models::{Role, User};
use crate::error::ApiError;
use crate::services::Requester;

/// Authenticated user context, resolved from the bearer token and the stored user.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn requester(&self) -> Requester {
        Requester { user_id: self.user_id, role: self.role }
    }
}

/// Verifies the bearer token, loads the user it names and injects
/// [`AuthUser`]. The stored role is authoritative.
pub async fn identity_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;
    let claims = validate_jwt(&token, &state.config.security.jwt_secret)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let doc = state
        .store
        .find_by_id("users", claims.sub)
        .await?
        .ok_or_else(|| {
            tracing::warn!("Token subject {} does not exist", claims.sub);
            ApiError::unauthorized("Unknown user")
        })?;
    let user: User = decode(doc)?;

    request.extensions_mut().insert(AuthUser {
        user_id: user.id,
        name: user.name,
        role: user.role,
    });

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}
