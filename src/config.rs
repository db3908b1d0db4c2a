use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_COPILOT_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

/// Runtime configuration for the management panel.
///
/// Values come from the process environment (after `.env` has been loaded),
/// with container settings optionally overridden by a TOML file.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub port: u16,
    pub workspaces_dir: PathBuf,
    pub base_port: u16,
    pub max_projects: u16,
    pub github_token: Option<String>,
    pub github_org: String,
    pub providers_file: PathBuf,
    pub copilot_client_id: String,
    pub container: ContainerSettings,
}

impl PanelConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspaces_dir = lookup("WORKSPACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/workspaces"));
        let providers_file = lookup("PROVIDERS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspaces_dir.join(".providers.json"));

        let mut container = ContainerSettings::default();
        if let Some(image) = lookup("OPENCODE_IMAGE") {
            container.image = image;
        }

        Ok(Self {
            port: parse_var(&lookup, "PANEL_PORT", 3000)?,
            workspaces_dir,
            base_port: parse_var(&lookup, "OPENCODE_BASE_PORT", 4100)?,
            max_projects: parse_var(&lookup, "MAX_PROJECTS", 20)?,
            github_token: lookup("GITHUB_TOKEN").filter(|t| !t.trim().is_empty()),
            github_org: lookup("GITHUB_ORG").unwrap_or_else(|| "essentia-uy".to_string()),
            providers_file,
            copilot_client_id: lookup("COPILOT_CLIENT_ID")
                .unwrap_or_else(|| DEFAULT_COPILOT_CLIENT_ID.to_string()),
            container,
        })
    }

    /// Workspace directory for a (sanitized) project name.
    pub fn workspace_dir(&self, name: &str) -> PathBuf {
        self.workspaces_dir.join(name)
    }
}

/// Shape of every project container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSettings {
    pub image: String,
    pub network: String,
    pub internal_port: u16,
    pub username: String,
    pub entrypoint: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "opencode-platform-opencode".to_string(),
            network: "opencode-net".to_string(),
            internal_port: 4096,
            username: "opencode".to_string(),
            entrypoint: "web".to_string(),
        }
    }
}

/// Raw TOML structure for the panel config file.
#[derive(Debug, Deserialize)]
struct PanelToml {
    container: Option<ContainerSection>,
}

#[derive(Debug, Deserialize)]
struct ContainerSection {
    image: Option<String>,
    network: Option<String>,
    internal_port: Option<u16>,
    username: Option<String>,
    entrypoint: Option<String>,
}

impl ContainerSettings {
    /// Overlay the `[container]` section of a TOML file onto `self`.
    /// A missing file leaves the settings untouched.
    pub fn merge_file(mut self, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(self);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let toml: PanelToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if let Some(section) = toml.container {
            if let Some(image) = section.image {
                self.image = image;
            }
            if let Some(network) = section.network {
                self.network = network;
            }
            if let Some(port) = section.internal_port {
                self.internal_port = port;
            }
            if let Some(username) = section.username {
                self.username = username;
            }
            if let Some(entrypoint) = section.entrypoint {
                self.entrypoint = entrypoint;
            }
        }

        Ok(self)
    }
}

/// Runtime configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub setup_file: PathBuf,
    pub worker: WorkerConfig,
    /// Delay between accepting a configuration and applying it.
    pub configure_delay: Duration,
}

/// How the supervised worker process is launched and stopped.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub port: u16,
    pub env_file: PathBuf,
    pub ready_marker: String,
    pub ready_timeout: Duration,
    pub stop_grace: Duration,
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let production = lookup("OPENCODE_ENV").as_deref() == Some("production");
        let dev_data = PathBuf::from("dev_data");

        let (db_default, setup_default, env_default) = if production {
            (
                PathBuf::from("/srv/opencode/controlplane.db"),
                PathBuf::from("/etc/opencode/setup.json"),
                PathBuf::from("/etc/opencode/opencode.env"),
            )
        } else {
            (
                dev_data.join("controlplane.db"),
                dev_data.join("setup.json"),
                PathBuf::from(".env"),
            )
        };

        let worker_port: u16 = parse_var(&lookup, "WORKER_PORT", 8080)?;
        let (program, args) = match lookup("WORKER_CMD") {
            Some(cmd) => split_command(&cmd)
                .with_context(|| format!("WORKER_CMD is empty: {:?}", cmd))?,
            None => (
                "npx".to_string(),
                vec![
                    "opencode-ai".to_string(),
                    "web".to_string(),
                    "--port".to_string(),
                    worker_port.to_string(),
                ],
            ),
        };

        Ok(Self {
            port: parse_var(&lookup, "PORT", 3000)?,
            db_path: lookup("CONTROLPLANE_DB").map(PathBuf::from).unwrap_or(db_default),
            setup_file: lookup("SETUP_FILE").map(PathBuf::from).unwrap_or(setup_default),
            worker: WorkerConfig {
                program,
                args,
                port: worker_port,
                env_file: lookup("WORKER_ENV_FILE").map(PathBuf::from).unwrap_or(env_default),
                ready_marker: "Running OpenCode Web".to_string(),
                ready_timeout: Duration::from_secs(5),
                stop_grace: Duration::from_secs(3),
            },
            configure_delay: Duration::from_secs(3),
        })
    }
}

fn split_command(cmd: &str) -> Option<(String, Vec<String>)> {
    let mut parts = cmd.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
