use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::providers::ProviderService;
use super::service::{CreateProject, DEFAULT_LOG_LINES, ProjectService};
use crate::errors::PanelError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub projects: ProjectService,
    pub providers: ProviderService,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectProviderRequest {
    #[serde(default)]
    pub api_key: String,
}

// ── Error handling ────────────────────────────────────────────────────

impl PanelError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PanelError::Validation(_) => StatusCode::BAD_REQUEST,
            PanelError::Conflict(_) => StatusCode::CONFLICT,
            PanelError::NotFound(_) => StatusCode::NOT_FOUND,
            PanelError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            PanelError::ExternalService(_) | PanelError::Config(_) | PanelError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PanelError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

impl From<JsonRejection> for PanelError {
    fn from(rejection: JsonRejection) -> Self {
        PanelError::Validation(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{name}", axum::routing::delete(delete_project))
        .route("/api/projects/{name}/start", post(start_project))
        .route("/api/projects/{name}/stop", post(stop_project))
        .route("/api/projects/{name}/logs", get(project_logs))
        .route("/api/providers", get(list_providers))
        .route(
            "/api/providers/{id}",
            post(connect_provider).delete(disconnect_provider),
        )
        .route("/api/providers/copilot/oauth/start", get(copilot_oauth_start))
        .route("/api/providers/copilot/oauth/poll", post(copilot_oauth_poll))
        .route("/api/health", get(health_check))
}

async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let config = state.projects.config();
    Json(serde_json::json!({
        "status": "ok",
        "workspacesDir": config.workspaces_dir,
        "githubOrg": config.github_org,
    }))
}

// ── Project handlers ──────────────────────────────────────────────────

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, PanelError> {
    Ok(Json(state.projects.list().await?))
}

async fn create_project(
    State(state): State<SharedState>,
    payload: Result<Json<CreateProject>, JsonRejection>,
) -> Result<impl IntoResponse, PanelError> {
    let Json(req) = payload?;
    let created = state.projects.create(req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn start_project(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, PanelError> {
    state.projects.start(&name).await?;
    Ok(Json(serde_json::json!({"name": name, "running": true})))
}

async fn stop_project(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, PanelError> {
    state.projects.stop(&name).await?;
    Ok(Json(serde_json::json!({"name": name, "running": false})))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, PanelError> {
    state.projects.delete(&name).await?;
    Ok(Json(serde_json::json!({"name": name, "deleted": true})))
}

async fn project_logs(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, PanelError> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    let logs = state.projects.logs(&name, lines).await?;
    Ok(Json(serde_json::json!({"logs": logs})))
}

// ── Provider handlers ─────────────────────────────────────────────────

async fn list_providers(State(state): State<SharedState>) -> Result<impl IntoResponse, PanelError> {
    Ok(Json(state.providers.list().await?))
}

async fn connect_provider(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<ConnectProviderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PanelError> {
    let Json(req) = payload?;
    state.providers.connect(&id, &req.api_key).await?;
    Ok(Json(serde_json::json!({"id": id, "connected": true})))
}

async fn disconnect_provider(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, PanelError> {
    state.providers.disconnect(&id).await?;
    Ok(Json(serde_json::json!({"id": id, "connected": false})))
}

async fn copilot_oauth_start(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, PanelError> {
    Ok(Json(state.providers.oauth_start().await?))
}

async fn copilot_oauth_poll(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, PanelError> {
    Ok(Json(state.providers.oauth_poll().await?))
}
