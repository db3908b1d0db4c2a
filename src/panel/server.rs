use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, body::Body, extract::Request, response::IntoResponse};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::git::GitCli;
use super::github::{GitHubClient, is_valid_github_token};
use super::providers::{ProviderService, ProviderStore};
use super::runtime::DockerRuntime;
use super::service::ProjectService;
use crate::assets::{PanelAssets, serve_embedded};
use crate::config::PanelConfig;

/// Command-line overrides for the panel server.
#[derive(Debug, Default)]
pub struct ServerConfig {
    pub port: Option<u16>,
    /// TOML file with a `[container]` section.
    pub config_file: Option<PathBuf>,
    pub dev_mode: bool,
}

/// Build the full application router: JSON API plus the embedded UI.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .fallback(static_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn static_handler(req: Request<Body>) -> impl IntoResponse {
    serve_embedded::<PanelAssets>(req.uri().path())
}

/// Start the panel server.
pub async fn start_server(server: ServerConfig) -> Result<()> {
    let mut config = PanelConfig::from_env()?;
    if let Some(port) = server.port {
        config.port = port;
    }
    if let Some(path) = &server.config_file {
        config.container = config.container.merge_file(path)?;
    }

    tokio::fs::create_dir_all(&config.workspaces_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.workspaces_dir.display()))?;
    match config.github_token.as_deref() {
        None => tracing::warn!(
            "GITHUB_TOKEN is not set; projects without a repository URL cannot be created"
        ),
        Some(token) if !is_valid_github_token(token) => {
            tracing::warn!("GITHUB_TOKEN does not look like a GitHub token")
        }
        Some(_) => {}
    }

    let runtime = DockerRuntime::connect().context("Failed to connect to the container runtime")?;
    let github = Arc::new(GitHubClient::new());
    let config = Arc::new(config);

    let providers = ProviderService::new(
        ProviderStore::new(config.providers_file.clone()),
        github.clone(),
        config.copilot_client_id.clone(),
    );
    let projects = ProjectService::new(
        config.clone(),
        Arc::new(runtime),
        github,
        Arc::new(GitCli),
    );
    let state = Arc::new(AppState {
        projects,
        providers,
    });

    let mut app = build_router(state);
    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        workspaces = %config.workspaces_dir.display(),
        github_org = %config.github_org,
        "panel listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("panel shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::fakes::{FakeCloner, FakeGitHub, FakeRuntime};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn test_router(dir: &tempfile::TempDir) -> Router {
        let workspaces = dir.path().to_string_lossy().to_string();
        let config = Arc::new(
            PanelConfig::from_lookup(|key| match key {
                "WORKSPACES_DIR" => Some(workspaces.clone()),
                _ => None,
            })
            .unwrap(),
        );
        let github = Arc::new(FakeGitHub::default());
        let state = Arc::new(AppState {
            providers: ProviderService::new(
                ProviderStore::new(config.providers_file.clone()),
                github.clone(),
                "client".into(),
            ),
            projects: ProjectService::new(
                config,
                Arc::new(FakeRuntime::default()),
                github,
                Arc::new(FakeCloner::default()),
            ),
        });
        build_router(state)
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(&dir).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ui_fallback() {
        let dir = tempfile::tempdir().unwrap();
        for uri in ["/", "/projects/demo"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = test_router(&dir).oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.port.is_none());
        assert!(config.config_file.is_none());
        assert!(!config.dev_mode);
    }
}
