use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use fundflow_server::api::api_router;
use fundflow_server::config::Config;
use fundflow_server::state_machine::repository::SqliteRepository;
use fundflow_server::{AppState, WorkflowEngine};

async fn help_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "fundflow",
        "version": fundflow_server::get_service_version(),
        "description": "Student fund requests: routing, review workflow and disbursements",
        "authentication": {
            "identity": "X-Actor-Id, X-Actor-Name, X-Actor-Email, X-Actor-Roles (comma-separated)",
            "token": "Authorization: Bearer <API_AUTH_TOKEN> when configured"
        },
        "configuration": {
            "optional_env_vars": [
                "PORT (default: 3000)",
                "STATE_DIR (default: current directory)",
                "API_AUTH_TOKEN (default: unset, no token check)",
                "STORE_RETRY_ATTEMPTS (default: 3)",
                "STORE_RETRY_BACKOFF_MS (default: 50)",
                "CONFLICT_RETRY_ATTEMPTS (default: 3)"
            ]
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting fundflow {}", fundflow_server::get_service_version());

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let db_path = config.db_path();
    info!("Using state database: {}", db_path.display());
    let sqlite_repo = SqliteRepository::new(&db_path).context("Failed to open state database")?;

    let engine = WorkflowEngine::new(Arc::new(sqlite_repo), config.engine_config());

    if config.api_auth_token.is_none() {
        info!("API_AUTH_TOKEN not set; trusting X-Actor headers without a token");
    }

    let app_state = Arc::new(AppState {
        engine: Arc::new(engine),
        api_auth_token: config.api_auth_token.clone(),
    });

    let app = Router::new()
        .route("/help", get(help_handler))
        .merge(api_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
