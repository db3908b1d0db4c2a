//! Typed error hierarchy for the platform.
//!
//! Two top-level enums cover the two processes:
//! - `PanelError`: project lifecycle and provider credential failures
//! - `ControlPlaneError`: setup gate, worker supervisor and proxy failures

use thiserror::Error;

/// Errors from the management panel. Every variant maps onto one HTTP status
/// at the request boundary (see `panel::api`).
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    ExternalService(String),

    #[error("{0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PanelError {
    /// Wrap a failed GitHub, git or container-runtime call, keeping the full
    /// context chain in the message.
    pub fn external(err: impl std::fmt::Display) -> Self {
        PanelError::ExternalService(err.to_string())
    }
}

impl From<anyhow::Error> for PanelError {
    fn from(err: anyhow::Error) -> Self {
        PanelError::ExternalService(format!("{:#}", err))
    }
}

/// Errors from the control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Worker process error: {0}")]
    Worker(String),

    #[error("Failed to write setup file {path}: {source}")]
    SetupFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream worker unreachable: {0}")]
    Proxy(String),
}
