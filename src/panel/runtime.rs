//! Container runtime wrapper: the handful of Docker Engine calls the panel
//! makes, behind the `ContainerRuntime` trait.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptions,
};
use futures::TryStreamExt;
use thiserror::Error;

use super::names::container_name;
use crate::config::ContainerSettings;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("No such container: {0}")]
    NotFound(String),

    #[error("Container runtime error: {0}")]
    Api(String),
}

/// Everything needed to create one project container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub internal_port: u16,
    pub host_port: u16,
    pub network: String,
    pub labels: BTreeMap<String, String>,
}

/// Live view of a container, as reported by inspect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStatus {
    pub running: bool,
    pub host_port: Option<u16>,
    /// Short (12 char) container id.
    pub id: Option<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create the container described by `spec` and start it. Returns the id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start an existing container. Starting a running container succeeds.
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stop a container. Stopping a stopped container succeeds.
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// `internal_port` selects which port binding is reported as `host_port`.
    async fn inspect(&self, name: &str, internal_port: u16) -> Result<ContainerStatus, RuntimeError>;

    /// Host ports published by any container, running or stopped.
    async fn published_ports(&self) -> Result<HashSet<u16>, RuntimeError>;

    /// Last `tail` lines of combined stdout/stderr.
    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<u8>, RuntimeError>;
}

/// Build the container for a project: workspace bind-mounted at
/// `/workspace`, the tool's port published on `host_port`, and Traefik labels
/// routing `/p/<project>/` to it with the prefix stripped.
pub fn project_container_spec(
    settings: &ContainerSettings,
    project: &str,
    workspace: &Path,
    host_port: u16,
    password: &str,
) -> ContainerSpec {
    let router = format!("project-{}", project);
    let mut labels = BTreeMap::new();
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{}.rule", router),
        format!("PathPrefix(`/p/{}/`)", project),
    );
    labels.insert(
        format!("traefik.http.routers.{}.entrypoints", router),
        settings.entrypoint.clone(),
    );
    labels.insert(format!("traefik.http.routers.{}.priority", router), "10".to_string());
    labels.insert(
        format!("traefik.http.middlewares.{}-strip.stripprefix.prefixes", router),
        format!("/p/{}", project),
    );
    labels.insert(
        format!("traefik.http.routers.{}.middlewares", router),
        format!("{}-strip", router),
    );
    labels.insert(
        format!("traefik.http.services.{}.loadbalancer.server.port", router),
        settings.internal_port.to_string(),
    );

    ContainerSpec {
        name: container_name(project),
        image: settings.image.clone(),
        env: vec![
            format!("OPENCODE_SERVER_PASSWORD={}", password),
            format!("OPENCODE_SERVER_USERNAME={}", settings.username),
        ],
        binds: vec![format!("{}:/workspace", workspace.display())],
        internal_port: settings.internal_port,
        host_port,
        network: settings.network.clone(),
        labels,
    }
}

/// Drop the control bytes (`0x00-0x08`, `0x0e-0x1f`) that the runtime's
/// stream multiplexing leaves in log output. Tabs and newlines survive.
pub fn strip_stream_framing(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| !matches!(c, '\u{00}'..='\u{08}' | '\u{0e}'..='\u{1f}'))
        .collect()
}

fn port_key(internal_port: u16) -> String {
    format!("{}/tcp", internal_port)
}

/// Docker create body for `spec`: one exposed port published on the host,
/// restarted unless stopped, attached to the project network.
fn container_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let key = port_key(spec.internal_port);
    let port_bindings = HashMap::from([(
        key.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.host_port.to_string()),
        }]),
    )]);

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: Some(vec![key]),
        labels: Some(spec.labels.clone().into_iter().collect()),
        host_config: Some(HostConfig {
            binds: Some(spec.binds.clone()),
            port_bindings: Some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            network_mode: Some(spec.network.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `ContainerRuntime` over the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    fn classify(name: &str, err: bollard::errors::Error) -> RuntimeError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => RuntimeError::NotFound(name.to_string()),
            other => RuntimeError::Api(other.to_string()),
        }
    }

    /// 304 means "already in the requested state".
    fn is_not_modified(err: &bollard::errors::Error) -> bool {
        matches!(
            err,
            bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }
        )
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptionsBuilder::default().name(&spec.name).build();
        let created = self
            .docker
            .create_container(Some(options), container_body(spec))
            .await
            .map_err(|e| Self::classify(&spec.name, e))?;

        if let Err(e) = self.start(&spec.name).await {
            // A created-but-unstarted container still holds the name and port.
            if let Err(rm) = self.remove(&spec.name).await {
                tracing::warn!(container = %spec.name, error = %rm, "failed to remove unstarted container");
            }
            return Err(e);
        }
        Ok(created.id)
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_modified(&e) => Ok(()),
            Err(e) => Err(Self::classify(name, e)),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_modified(&e) => Ok(()),
            Err(e) => Err(Self::classify(name, e)),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn inspect(&self, name: &str, internal_port: u16) -> Result<ContainerStatus, RuntimeError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::classify(name, e))?;

        let running = info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let host_port = info
            .host_config
            .as_ref()
            .and_then(|hc| hc.port_bindings.as_ref())
            .and_then(|pb| pb.get(&port_key(internal_port)))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|b| b.host_port.as_deref())
            .and_then(|p| p.parse().ok());
        let id = info.id.map(|id| id.chars().take(12).collect());

        Ok(ContainerStatus {
            running,
            host_port,
            id,
        })
    }

    async fn published_ports(&self) -> Result<HashSet<u16>, RuntimeError> {
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        Ok(containers
            .into_iter()
            .flat_map(|c| c.ports.unwrap_or_default())
            .filter_map(|p| p.public_port)
            .collect())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();
        let chunks: Vec<_> = self
            .docker
            .logs(name, Some(options))
            .try_collect()
            .await
            .map_err(|e| Self::classify(name, e))?;
        Ok(chunks
            .into_iter()
            .flat_map(|chunk| chunk.into_bytes())
            .collect())
    }
}
