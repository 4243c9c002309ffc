//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use apilens_core::network::{ExecuteOptions, RequestExecutor};
use apilens_core::{ProbeSettings, SchemaCatalog};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Request executor; owns the per-host circuit breakers
    pub executor: RequestExecutor,
    /// Schemas loaded from `schemas_dir`, replaced on rescan
    pub catalog: RwLock<SchemaCatalog>,
    /// Directory scanned for schema files
    pub schemas_dir: PathBuf,
    /// Options applied when a call does not override them
    pub default_options: ExecuteOptions,
}

impl AppState {
    /// Build state from settings, scanning `schemas_dir` once.
    pub fn from_settings(
        settings: &ProbeSettings,
        schemas_dir: PathBuf,
    ) -> apilens_core::Result<Self> {
        let executor = RequestExecutor::with_config(settings.executor.executor_config())?;
        let catalog = SchemaCatalog::scan(&schemas_dir)?;

        Ok(Self {
            executor,
            catalog: RwLock::new(catalog),
            schemas_dir,
            default_options: settings.executor.execute_options(),
        })
    }
}

/// Build the router: `GET /health` and `POST /rpc`.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Configure CORS for local tooling
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
