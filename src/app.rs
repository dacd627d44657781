use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{AppConfig, SecurityConfig};
use crate::database::DocumentStore;
use crate::handlers::{companies, resources};
use crate::middleware::identity_middleware;

/// Shared handler state: the document store and the resolved configuration.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig) -> Self {
        Self { store, config: Arc::new(config) }
    }
}

pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        // Authenticated
        .merge(api_routes(state.clone()))
        .layer(DefaultBodyLimit::max(state.config.api.max_request_size_bytes));

    if let Some(cors) = cors_layer(&state.config.security) {
        router = router.layer(cors);
    }
    if state.config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }

    router.with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/:resource", get(resources::list).post(resources::create))
        .route(
            "/api/v1/:resource/:id",
            get(resources::get)
                .patch(resources::update)
                .put(resources::update)
                .delete(resources::delete),
        )
        .route("/api/v1/:resource/:id/employees", post(companies::add_employee))
        .route(
            "/api/v1/:resource/:id/employees/:user_id",
            axum::routing::delete(companies::remove_employee),
        )
        .route_layer(middleware::from_fn_with_state(state, identity_middleware))
}

fn cors_layer(security: &SecurityConfig) -> Option<CorsLayer> {
    if !security.enable_cors {
        return None;
    }
    if security.cors_origins.is_empty() || security.cors_origins.iter().any(|o| o == "*") {
        return Some(CorsLayer::permissive());
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "IssueHub API",
            "version": version,
            "description": "Multi-tenant issue tracking API",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "resources": "/api/v1/:resource[/:id] (protected)",
                "employees": "/api/v1/companies/:id/employees[/:user_id] (protected)",
            },
            "resources": ["users", "companies", "projects", "services", "tickets", "comments"],
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.store.ping().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
