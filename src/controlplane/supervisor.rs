//! Supervisor for the single worker process the control plane proxies to.

use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};

use crate::config::WorkerConfig;
use crate::errors::ControlPlaneError;

enum WorkerState {
    NotStarted,
    Running(Child),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerPhase,
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
}

/// Owns the worker child process. The state mutex is held across spawn and
/// stop so concurrent callers cannot start two workers. It is released before
/// the ready wait, so `status()` stays responsive while a worker boots.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    state: Mutex<WorkerState>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WorkerState::NotStarted),
        }
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Spawn the worker unless it is already running, then wait (bounded by
    /// the ready timeout) for it to print its ready marker.
    pub async fn start(&self) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        reap(&mut state);
        if matches!(*state, WorkerState::Running(_)) {
            return Ok(());
        }

        let env = load_env_file(&self.config.env_file)?;
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ControlPlaneError::Worker(format!(
                    "Failed to spawn {}: {}",
                    self.config.program, e
                ))
            })?;

        let pid = child.id();
        tracing::info!(pid, program = %self.config.program, port = self.config.port, "worker spawned");

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(stdout) = child.stdout.take() {
            let marker = self.config.ready_marker.clone();
            tokio::spawn(forward_lines(stdout, "stdout", Some((marker, ready_tx))));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr", None));
        }
        *state = WorkerState::Running(child);
        drop(state);

        match tokio::time::timeout(self.config.ready_timeout, ready_rx).await {
            Ok(Ok(())) => tracing::info!(pid, "worker ready"),
            Ok(Err(_)) => tracing::warn!(pid, "worker output closed before it reported ready"),
            Err(_) => tracing::info!(
                pid,
                timeout_ms = self.config.ready_timeout.as_millis() as u64,
                "worker not ready yet; continuing"
            ),
        }
        Ok(())
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    pub async fn stop(&self) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        if let WorkerState::Running(child) = &mut *state {
            terminate(child, self.config.stop_grace).await?;
            *state = WorkerState::Stopped;
        }
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), ControlPlaneError> {
        self.stop().await?;
        self.start().await
    }

    pub async fn status(&self) -> WorkerStatus {
        let mut state = self.state.lock().await;
        reap(&mut state);
        let (phase, pid) = match &*state {
            WorkerState::NotStarted => (WorkerPhase::NotStarted, None),
            WorkerState::Running(child) => (WorkerPhase::Running, child.id()),
            WorkerState::Stopped => (WorkerPhase::Stopped, None),
        };
        WorkerStatus {
            state: phase,
            running: phase == WorkerPhase::Running,
            pid,
            port: self.config.port,
        }
    }
}

/// Move a worker that exited on its own to `Stopped`.
fn reap(state: &mut WorkerState) {
    let exited = match state {
        WorkerState::Running(child) => child.try_wait().ok().flatten(),
        _ => None,
    };
    if let Some(status) = exited {
        tracing::warn!(%status, "worker exited");
        *state = WorkerState::Stopped;
    }
}

async fn terminate(child: &mut Child, grace: std::time::Duration) -> Result<(), ControlPlaneError> {
    if let Ok(Some(_)) = child.try_wait() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(raw) = child.id() {
            let pid = i32::try_from(raw)
                .map_err(|_| ControlPlaneError::Worker(format!("pid {} out of range", raw)))?;
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!(pid, error = %e, "failed to send SIGTERM to worker");
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(%status, "worker stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(ControlPlaneError::Worker(format!(
            "Failed to wait for worker: {}",
            e
        ))),
        Err(_) => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "worker ignored SIGTERM; killing"
            );
            child
                .kill()
                .await
                .map_err(|e| ControlPlaneError::Worker(format!("Failed to kill worker: {}", e)))
        }
    }
}

/// `KEY=VALUE` pairs for the worker. A missing file yields none.
fn load_env_file(path: &Path) -> Result<Vec<(String, String)>, ControlPlaneError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        ControlPlaneError::Worker(format!("Failed to read {}: {}", path.display(), e))
    })?;
    iter.collect::<Result<Vec<_>, _>>().map_err(|e| {
        ControlPlaneError::Worker(format!("Failed to parse {}: {}", path.display(), e))
    })
}

async fn forward_lines<R>(reader: R, stream: &'static str, mut ready: Option<(String, oneshot::Sender<()>)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "worker", stream, "{}", line);
        let is_ready = ready
            .as_ref()
            .is_some_and(|(marker, _)| line.contains(marker.as_str()));
        if is_ready {
            if let Some((_, tx)) = ready.take() {
                let _ = tx.send(());
            }
        }
    }
}
