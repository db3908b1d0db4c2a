use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::io::AsyncWriteExt;

use super::db::{DbHandle, KEY_DOMAIN, KEY_GITHUB_REPO, KEY_STATUS};
use super::proxy::WorkerProxy;
use super::status::ConfigStatus;
use super::supervisor::WorkerSupervisor;
use crate::assets::{SetupAssets, serve_embedded};
use crate::config::ControlPlaneConfig;
use crate::errors::ControlPlaneError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub supervisor: WorkerSupervisor,
    pub proxy: WorkerProxy,
    pub setup_file: PathBuf,
    pub configure_delay: Duration,
}

impl AppState {
    pub fn new(db: DbHandle, config: &ControlPlaneConfig) -> Self {
        Self {
            db,
            supervisor: WorkerSupervisor::new(config.worker.clone()),
            proxy: WorkerProxy::new(config.worker.port),
            setup_file: config.setup_file.clone(),
            configure_delay: config.configure_delay,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    BadGateway(String),
}

impl From<ControlPlaneError> for ApiError {
    fn from(err: ControlPlaneError) -> Self {
        match err {
            ControlPlaneError::Proxy(_) => ApiError::BadGateway(err.to_string()),
            other => ApiError::Internal(format!("{:#}", anyhow::Error::from(other))),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn db_error(err: anyhow::Error) -> ApiError {
    ControlPlaneError::Database(err).into()
}

// ── Router ────────────────────────────────────────────────────────────

/// API, setup wizard, and the gate in front of the worker for everything else.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/configure", post(configure))
        .route("/api/restart", post(restart))
        .route("/setup", get(setup_index))
        .route("/setup/", get(setup_index))
        .route("/setup/{*path}", get(setup_asset))
        .fallback(gate)
}

async fn get_status(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let (status, domain, github_repo) = state
        .db
        .call(|db| Ok((db.status()?, db.get(KEY_DOMAIN)?, db.get(KEY_GITHUB_REPO)?)))
        .await
        .map_err(db_error)?;
    let worker = state.supervisor.status().await;
    Ok(Json(serde_json::json!({
        "status": status,
        "domain": domain,
        "githubRepo": github_repo,
        "worker": worker,
    })))
}

/// Record the settings, answer immediately, and apply them after the
/// configured delay.
async fn configure(
    State(state): State<SharedState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let fields = payload
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Configuration must be a JSON object".into()))?;
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let domain = text("domain");
    let github_repo = text("github_repo");

    state
        .db
        .call(move |db| {
            db.set(KEY_DOMAIN, &domain)?;
            db.set(KEY_GITHUB_REPO, &github_repo)?;
            db.set(KEY_STATUS, ConfigStatus::Configuring.as_str())
        })
        .await
        .map_err(db_error)?;
    tracing::info!("configuration accepted");

    tokio::spawn(apply_configuration(state.clone(), payload));

    Ok(Json(serde_json::json!({"message": "Configuration started"})))
}

async fn apply_configuration(state: SharedState, payload: serde_json::Value) {
    tokio::time::sleep(state.configure_delay).await;

    match finish_configuration(&state, &payload).await {
        Ok(()) => tracing::info!(setup_file = %state.setup_file.display(), "configuration applied"),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", anyhow::Error::from(e)), "configuration failed");
            if let Err(e) = state.db.set_status(ConfigStatus::Error).await {
                tracing::error!(error = %format!("{:#}", e), "failed to record ERROR status");
            }
        }
    }
}

async fn finish_configuration(
    state: &AppState,
    payload: &serde_json::Value,
) -> Result<(), ControlPlaneError> {
    write_setup_file(&state.setup_file, payload).await?;
    state.supervisor.start().await?;
    state
        .db
        .set_status(ConfigStatus::Ready)
        .await
        .map_err(ControlPlaneError::Database)
}

/// Pretty JSON, readable by the owner only.
async fn write_setup_file(path: &FsPath, payload: &serde_json::Value) -> Result<(), ControlPlaneError> {
    let setup_err = |source: std::io::Error| ControlPlaneError::SetupFile {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(payload).map_err(|e| setup_err(e.into()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(setup_err)?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await.map_err(setup_err)?;
    file.write_all(&json).await.map_err(setup_err)?;
    file.flush().await.map_err(setup_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(setup_err)?;
    }
    Ok(())
}

async fn restart(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    state.supervisor.restart().await?;
    Ok(Json(serde_json::json!({"message": "Restarted successfully"})))
}

async fn setup_index() -> Response {
    serve_embedded::<SetupAssets>("index.html")
}

async fn setup_asset(Path(path): Path<String>) -> Response {
    serve_embedded::<SetupAssets>(&path)
}

/// Everything that is not API or setup: redirect to the wizard until
/// configured, then hand the request to the worker.
async fn gate(State(state): State<SharedState>, req: Request) -> Response {
    match pass_gate(&state, req).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn pass_gate(state: &AppState, req: Request) -> Result<Response, ApiError> {
    let status = state.db.status().await.map_err(db_error)?;
    if !status.is_ready() {
        if req.uri().path().starts_with("/api/") {
            return Err(ApiError::NotFound(format!("No route for {}", req.uri().path())));
        }
        return Ok((StatusCode::FOUND, [(header::LOCATION, "/setup")]).into_response());
    }

    state.supervisor.start().await?;
    tracing::debug!(method = %req.method(), uri = %req.uri(), "proxying to worker");
    Ok(state.proxy.forward(req).await?)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::controlplane::db::ConfigDb;
    use crate::controlplane::supervisor::WorkerPhase;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        dir: tempfile::TempDir,
        state: SharedState,
        router: Router,
    }

    fn test_app(status: ConfigStatus, worker_port: u16) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let db = ConfigDb::new_in_memory().unwrap();
        db.set(KEY_STATUS, status.as_str()).unwrap();

        let config = ControlPlaneConfig {
            port: 0,
            db_path: dir.path().join("controlplane.db"),
            setup_file: dir.path().join("etc").join("setup.json"),
            worker: WorkerConfig {
                program: "sleep".into(),
                args: vec!["30".into()],
                port: worker_port,
                env_file: dir.path().join("opencode.env"),
                ready_marker: "Running OpenCode Web".into(),
                ready_timeout: Duration::from_millis(100),
                stop_grace: Duration::from_millis(500),
            },
            configure_delay: Duration::ZERO,
        };
        let state = Arc::new(AppState::new(DbHandle::new(db), &config));
        TestApp {
            dir,
            router: router().with_state(state.clone()),
            state,
        }
    }

    async fn spawn_upstream() -> u16 {
        let app = Router::new().route("/hello", get(|| async { "hi from worker" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_status(state: &AppState, want: ConfigStatus) {
        for _ in 0..50 {
            if state.db.status().await.unwrap() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("status never became {}", want);
    }

    #[tokio::test]
    async fn test_unconfigured_redirects_to_setup() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        for uri in ["/", "/some/page"] {
            let resp = app.router.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(resp.headers()[header::LOCATION], "/setup");
        }
    }

    #[tokio::test]
    async fn test_error_and_configuring_also_redirect() {
        for status in [ConfigStatus::Configuring, ConfigStatus::Error] {
            let app = test_app(status, free_port().await);
            let resp = app.router.oneshot(get_request("/")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::FOUND);
        }
    }

    #[tokio::test]
    async fn test_setup_is_served_without_gate() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        for uri in ["/setup", "/setup/", "/setup/index.html"] {
            let resp = app.router.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_status_reports_settings_and_worker() {
        let app = test_app(ConfigStatus::Unconfigured, 18081);
        let resp = app.router.oneshot(get_request("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.into_body()).await;
        assert_eq!(body["status"], "UNCONFIGURED");
        assert_eq!(body["domain"], serde_json::Value::Null);
        assert_eq!(body["worker"]["state"], "not_started");
        assert_eq!(body["worker"]["port"], 18081);
    }

    #[tokio::test]
    async fn test_configure_flow_reaches_ready() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        let req = Request::builder()
            .method("POST")
            .uri("/api/configure")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"domain": "oc.example.com", "github_repo": "acme/infra", "token": "t"})
                    .to_string(),
            ))
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.into_body()).await;
        assert_eq!(body["message"], "Configuration started");

        wait_for_status(&app.state, ConfigStatus::Ready).await;

        let setup = app.dir.path().join("etc").join("setup.json");
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&setup).unwrap()).unwrap();
        assert_eq!(saved["domain"], "oc.example.com");
        assert_eq!(saved["token"], "t");
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&setup).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let resp = app.router.oneshot(get_request("/api/status")).await.unwrap();
        let body = body_json(resp.into_body()).await;
        assert_eq!(body["status"], "READY");
        assert_eq!(body["domain"], "oc.example.com");
        assert_eq!(body["githubRepo"], "acme/infra");
        assert_eq!(body["worker"]["running"], true);

        app.state.supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_configure_failure_sets_error() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        // Parent of the setup file is a regular file, so the write fails.
        std::fs::write(app.dir.path().join("etc"), "not a directory").unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/api/configure")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"domain":"oc.example.com"}"#))
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        wait_for_status(&app.state, ConfigStatus::Error).await;
        assert_eq!(app.state.supervisor.status().await.state, WorkerPhase::NotStarted);
    }

    #[tokio::test]
    async fn test_configure_rejects_non_object() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        let req = Request::builder()
            .method("POST")
            .uri("/api/configure")
            .header("content-type", "application/json")
            .body(Body::from("[1,2]"))
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            app.state.db.status().await.unwrap(),
            ConfigStatus::Unconfigured
        );
    }

    #[tokio::test]
    async fn test_configure_malformed_json_is_json_400() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        let req = Request::builder()
            .method("POST")
            .uri("/api/configure")
            .header("content-type", "application/json")
            .body(Body::from("{\"domain\": "))
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp.into_body()).await["error"].is_string());
        assert_eq!(
            app.state.db.status().await.unwrap(),
            ConfigStatus::Unconfigured
        );
    }

    #[tokio::test]
    async fn test_ready_proxies_and_starts_worker_lazily() {
        let upstream = spawn_upstream().await;
        let app = test_app(ConfigStatus::Ready, upstream);
        assert_eq!(app.state.supervisor.status().await.state, WorkerPhase::NotStarted);

        let resp = app.router.oneshot(get_request("/hello")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hi from worker");
        assert!(app.state.supervisor.status().await.running);

        app.state.supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_with_unreachable_worker_is_502() {
        let app = test_app(ConfigStatus::Ready, free_port().await);
        let resp = app.router.oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        app.state.supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_starts_worker() {
        let app = test_app(ConfigStatus::Ready, free_port().await);
        let resp = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/restart")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.into_body()).await;
        assert_eq!(body["message"], "Restarted successfully");
        assert!(app.state.supervisor.status().await.running);
        app.state.supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_api_route_is_404_before_setup() {
        let app = test_app(ConfigStatus::Unconfigured, free_port().await);
        let resp = app.router.oneshot(get_request("/api/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
