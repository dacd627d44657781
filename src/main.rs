use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use issuehub_api::auth::{generate_jwt, Claims};
use issuehub_api::config::{config, StoreBackend};
use issuehub_api::database::{DatabaseManager, DocumentStore, MemoryStore, PgStore};
use issuehub_api::{app, AppState};

#[derive(Parser)]
#[command(name = "issuehub-api")]
#[command(about = "IssueHub API server")]
#[command(version)]
struct Args {
    #[arg(long, help = "Port to listen on")]
    port: Option<u16>,

    #[arg(long, help = "Document store backend (memory or postgres)")]
    backend: Option<StoreBackend>,

    #[arg(long, help = "Create the Postgres tables before serving")]
    migrate: bool,

    #[arg(long, value_name = "USER_ID", help = "Print a bearer token for the user and exit")]
    issue_token: Option<Uuid>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the config singleton reads the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("issuehub_api=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let mut settings = config().clone();
    if let Some(port) = args.port {
        settings.api.port = port;
    }
    if let Some(backend) = args.backend {
        settings.database.backend = backend;
    }
    if settings.security.jwt_secret.is_empty() {
        bail!("JWT_SECRET must be set outside development");
    }

    if let Some(user_id) = args.issue_token {
        let claims = Claims::new(user_id, settings.security.jwt_expiry_hours);
        println!("{}", generate_jwt(&claims, &settings.security.jwt_secret)?);
        return Ok(());
    }

    tracing::info!(
        "Starting IssueHub API in {:?} mode with {:?} store",
        settings.environment,
        settings.database.backend
    );

    let store: Arc<dyn DocumentStore> = match settings.database.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Postgres => {
            let pool = DatabaseManager::connect(&settings.database)
                .await
                .context("failed to connect to Postgres")?;
            let store = PgStore::new(pool);
            if args.migrate {
                store.migrate().await.context("migration failed")?;
                tracing::info!("Document tables ready");
            }
            Arc::new(store)
        }
    };

    let bind_addr = format!("0.0.0.0:{}", settings.api.port);
    let router = app(AppState::new(store, settings));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("IssueHub API listening on http://{}", bind_addr);

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
