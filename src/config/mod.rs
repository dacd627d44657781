use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Read `APP_ENV`; anything unrecognised is development.
    fn detect() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound for `limit`; larger requests are capped.
    pub max_limit: Option<u64>,
    /// Sort applied when a list request has no `sort` parameter.
    pub default_sort: String,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "postgres" | "pg" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub max_connections: u32,
    /// Pool acquire timeout in seconds.
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    /// HS256 signing secret. Only development ships with one.
    #[serde(skip_serializing, default)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

const MB: usize = 1024 * 1024;

impl AppConfig {
    /// Preset for `APP_ENV`, then individual variables on top.
    pub fn from_env() -> Self {
        let mut config = Self::preset(Environment::detect());
        config.apply_env();
        config
    }

    pub fn development() -> Self {
        Self::preset(Environment::Development)
    }

    /// Built-in defaults. Deployed environments talk to Postgres, tighten
    /// limits and expect `JWT_SECRET` from the environment.
    pub fn preset(environment: Environment) -> Self {
        let deployed = environment != Environment::Development;
        let (max_limit, max_connections, connection_timeout, body_mb, expiry_hours, origin) = match environment {
            Environment::Development => (1000, 10, 30, 10, 24 * 7, "http://localhost:5173"),
            Environment::Staging => (500, 20, 10, 5, 24, "https://staging.issuehub.dev"),
            Environment::Production => (100, 50, 5, 2, 4, "https://app.issuehub.dev"),
        };

        Self {
            environment,
            query: QueryConfig {
                max_limit: Some(max_limit),
                default_sort: "createdAt:desc".to_string(),
                debug_logging: !deployed,
            },
            database: DatabaseConfig {
                backend: if deployed { StoreBackend::Postgres } else { StoreBackend::Memory },
                max_connections,
                connection_timeout,
            },
            api: ApiConfig {
                port: 9001,
                enable_request_logging: environment != Environment::Production,
                max_request_size_bytes: body_mb * MB,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![origin.to_string()],
                jwt_secret: if deployed { String::new() } else { "issuehub-development-secret".to_string() },
                jwt_expiry_hours: expiry_hours,
            },
        }
    }

    fn apply_env(&mut self) {
        if let Some(limit) = env_value::<u64>("QUERY_MAX_LIMIT") {
            self.query.max_limit = Some(limit).filter(|l| *l > 0);
        }
        override_from_env("QUERY_DEFAULT_SORT", &mut self.query.default_sort);
        override_from_env("QUERY_DEBUG_LOGGING", &mut self.query.debug_logging);

        override_from_env("STORE_BACKEND", &mut self.database.backend);
        override_from_env("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_from_env("DATABASE_CONNECTION_TIMEOUT", &mut self.database.connection_timeout);

        override_from_env("PORT", &mut self.api.port);
        override_from_env("ISSUEHUB_PORT", &mut self.api.port);
        override_from_env("API_ENABLE_REQUEST_LOGGING", &mut self.api.enable_request_logging);
        override_from_env("API_MAX_REQUEST_SIZE_BYTES", &mut self.api.max_request_size_bytes);

        override_from_env("SECURITY_ENABLE_CORS", &mut self.security.enable_cors);
        if let Ok(origins) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        override_from_env("JWT_SECRET", &mut self.security.jwt_secret);
        override_from_env("SECURITY_JWT_EXPIRY_HOURS", &mut self.security.jwt_expiry_hours);
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

/// Replace `target` when `key` is set and parses; keep the preset otherwise.
fn override_from_env<T: FromStr>(key: &str, target: &mut T) {
    if let Some(value) = env_value(key) {
        *target = value;
    }
}

/// Process-wide configuration, read from the environment on first use.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_runs_in_memory_with_a_secret() {
        let config = AppConfig::development();
        assert_eq!(config.query.max_limit, Some(1000));
        assert_eq!(config.query.default_sort, "createdAt:desc");
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert!(!config.security.jwt_secret.is_empty());
    }

    #[test]
    fn production_needs_postgres_and_an_external_secret() {
        let config = AppConfig::preset(Environment::Production);
        assert_eq!(config.query.max_limit, Some(100));
        assert_eq!(config.database.backend, StoreBackend::Postgres);
        assert_eq!(config.api.max_request_size_bytes, 2 * MB);
        assert!(!config.api.enable_request_logging);
        assert!(config.security.jwt_secret.is_empty());
    }

    #[test]
    fn parses_store_backend() {
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("PG".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("sqlite".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn secret_is_never_serialized() {
        let json = serde_json::to_value(AppConfig::development()).unwrap();
        assert!(json["security"].get("jwt_secret").is_none());
        assert_eq!(json["database"]["backend"], "memory");
    }
}
