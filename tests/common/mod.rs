#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use issuehub_api::auth::{generate_jwt, Claims};
use issuehub_api::config::AppConfig;
use issuehub_api::database::document::with_system_fields;
use issuehub_api::database::{DocumentStore, MemoryStore};
use issuehub_api::{app, AppState};

/// In-process server over a fresh in-memory store.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub config: AppConfig,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        let mut config = AppConfig::development();
        config.api.enable_request_logging = false;
        config.query.debug_logging = false;

        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config.clone());
        Self { router: app(state), store, config }
    }

    /// Insert a user straight into the store and return its id.
    pub async fn seed_user(&self, name: &str, role: &str) -> Result<Uuid> {
        let doc = json!({ "name": name, "email": format!("{}@example.com", name.to_lowercase()), "role": role });
        let Value::Object(fields) = doc else { unreachable!() };
        let created = self.store.create("users", with_system_fields(fields)).await?;
        id_of(&Value::Object(created))
    }

    pub fn token(&self, user_id: Uuid) -> Result<String> {
        let claims = Claims::new(user_id, 1);
        Ok(generate_jwt(&claims, &self.config.security.jwt_secret)?)
    }

    pub async fn send(&self, method: Method, uri: &str, as_user: Option<Uuid>, body: Option<Value>) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = as_user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)?));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await.context("router failed")?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
        Ok(TestResponse { status, body })
    }

    pub async fn get(&self, uri: &str, as_user: Uuid) -> Result<TestResponse> {
        self.send(Method::GET, uri, Some(as_user), None).await
    }

    pub async fn post(&self, uri: &str, as_user: Uuid, body: Value) -> Result<TestResponse> {
        self.send(Method::POST, uri, Some(as_user), Some(body)).await
    }

    pub async fn put(&self, uri: &str, as_user: Uuid, body: Value) -> Result<TestResponse> {
        self.send(Method::PUT, uri, Some(as_user), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, as_user: Uuid) -> Result<TestResponse> {
        self.send(Method::DELETE, uri, Some(as_user), None).await
    }

    /// Create a company through the API as `as_user` and return its id.
    pub async fn create_company(&self, as_user: Uuid, body: Value) -> Result<Uuid> {
        let res = self.post("/api/v1/companies", as_user, body).await?;
        anyhow::ensure!(res.status == StatusCode::CREATED, "company create failed: {} {}", res.status, res.body);
        id_of(&res.body["data"])
    }

    pub async fn user_company(&self, user_id: Uuid) -> Result<Value> {
        let doc = self.store.find_by_id("users", user_id).await?.context("user missing")?;
        Ok(doc.get("company").cloned().unwrap_or(Value::Null))
    }
}

pub fn id_of(doc: &Value) -> Result<Uuid> {
    let raw = doc["_id"].as_str().context("document has no _id")?;
    Ok(Uuid::parse_str(raw)?)
}
