use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::db::{ConfigDb, DbHandle};
use crate::config::ControlPlaneConfig;

#[derive(Debug, Default)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    api::router()
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the control plane. Stops the worker once the server has drained.
pub async fn start_server(server: ServerConfig) -> Result<()> {
    let mut config = ControlPlaneConfig::from_env()?;
    if let Some(port) = server.port {
        config.port = port;
    }

    let db = ConfigDb::new(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let state = Arc::new(AppState::new(DbHandle::new(db), &config));

    let status = state.db.status().await?;
    tracing::info!(%status, db = %config.db_path.display(), "loaded configuration status");
    if status.is_ready() {
        if let Err(e) = state.supervisor.start().await {
            tracing::error!(error = %e, "failed to start worker on boot");
        }
    }

    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        worker_port = config.worker.port,
        "control plane listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await
        .context("Server error")?;

    state.supervisor.stop().await?;
    tracing::info!("control plane shut down");
    Ok(())
}
