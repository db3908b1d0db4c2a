//! Project lifecycle: create, list, start, stop, delete and logs.
//!
//! Each operation is a straight sequence of calls to the three external
//! clients (GitHub, git, container runtime) with the per-project metadata file
//! as the only bookkeeping. There is no locking; two concurrent creates of
//! the same name, or two allocations of the same port, are not prevented.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::git::RepoCloner;
use super::github::{GitHub, with_token_in_url};
use super::meta::{ProjectMeta, read_meta, write_meta};
use super::names::{
    DEFAULT_PASSWORD_LENGTH, container_name, generate_password, is_valid_name, sanitize_name,
};
use super::ports::next_available_port;
use super::providers::ProviderStore;
use super::runtime::{ContainerRuntime, RuntimeError, project_container_spec, strip_stream_framing};
use crate::config::PanelConfig;
use crate::errors::PanelError;

pub const DEFAULT_LOG_LINES: usize = 50;

/// Body of `POST /api/projects`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    pub name: Option<String>,
    pub repo: Option<String>,
    pub description: Option<String>,
    /// Extra `.env` entries for this project, keyed by variable name.
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedProject {
    pub name: String,
    pub repo: String,
    pub port: u16,
    pub auto_created: bool,
    pub password: String,
}

/// One row of `GET /api/projects`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub name: String,
    pub repo: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub auto_created: bool,
    pub running: bool,
    pub port: Option<u16>,
    pub container_id: Option<String>,
}

/// What `create` has done so far, so a failure can undo it.
#[derive(Debug, Default)]
struct Progress {
    auto_created: bool,
}

pub struct ProjectService {
    config: Arc<PanelConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    github: Arc<dyn GitHub>,
    cloner: Arc<dyn RepoCloner>,
    providers: ProviderStore,
}

impl ProjectService {
    pub fn new(
        config: Arc<PanelConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        github: Arc<dyn GitHub>,
        cloner: Arc<dyn RepoCloner>,
    ) -> Self {
        let providers = ProviderStore::new(config.providers_file.clone());
        Self {
            config,
            runtime,
            github,
            cloner,
            providers,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// Every workspace directory, merged with its container's live state.
    pub async fn list(&self) -> Result<Vec<ProjectView>, PanelError> {
        let names = self.project_names().await?;
        let internal_port = self.config.container.internal_port;

        let views = futures::future::join_all(names.into_iter().map(|name| async move {
            let workspace = self.config.workspace_dir(&name);
            let meta = read_meta(&workspace).await;
            let status = match self.runtime.inspect(&container_name(&name), internal_port).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!(project = %name, error = %e, "inspect failed; reporting stopped");
                    Default::default()
                }
            };
            ProjectView {
                repo: meta.repo,
                description: Some(meta.description).filter(|d| !d.is_empty()),
                created_at: meta.created_at,
                created_by: meta.created_by,
                auto_created: meta.auto_created,
                running: status.running,
                port: status.host_port.or(meta.port),
                container_id: status.id,
                name,
            }
        }))
        .await;

        Ok(views)
    }

    async fn project_names(&self) -> Result<Vec<String>, PanelError> {
        let mut entries = match tokio::fs::read_dir(&self.config.workspaces_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn create(&self, req: CreateProject) -> Result<CreatedProject, PanelError> {
        let raw = req
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| PanelError::Validation("El nombre es obligatorio".into()))?;
        let name = sanitize_name(raw);
        if name.is_empty() {
            return Err(PanelError::Validation("Nombre de proyecto inválido".into()));
        }

        let workspace = self.config.workspace_dir(&name);
        if tokio::fs::try_exists(&workspace).await? {
            return Err(PanelError::Conflict(format!(
                "El proyecto \"{}\" ya existe",
                name
            )));
        }
        let repo = req.repo.clone().filter(|r| !r.trim().is_empty());
        if repo.is_none() {
            self.github_token()?;
        }

        let mut progress = Progress::default();
        match self
            .provision(&name, &workspace, repo, &req, &mut progress)
            .await
        {
            Ok(created) => {
                tracing::info!(project = %name, port = created.port, auto_created = created.auto_created, "project created");
                Ok(created)
            }
            Err(e) => {
                tracing::warn!(project = %name, error = %e, "project creation failed; cleaning up");
                self.rollback(&name, &workspace, &progress).await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        name: &str,
        workspace: &Path,
        repo: Option<String>,
        req: &CreateProject,
        progress: &mut Progress,
    ) -> Result<CreatedProject, PanelError> {
        let description = req.description.clone().unwrap_or_default();

        let repo = match repo {
            Some(url) => url,
            None => {
                let token = self.github_token()?;
                let url = self
                    .github
                    .create_org_repo(token, &self.config.github_org, name, &description)
                    .await?;
                progress.auto_created = true;
                url
            }
        };

        tokio::fs::create_dir_all(workspace).await?;
        let clone_url = match (progress.auto_created, self.config.github_token.as_deref()) {
            (true, Some(token)) => with_token_in_url(&repo, token),
            _ => repo.clone(),
        };
        self.cloner.clone_repo(&clone_url, workspace).await?;

        self.write_env_file(workspace, &req.api_keys).await?;

        let mut meta = ProjectMeta {
            repo: Some(repo.clone()),
            description,
            created_at: Some(Utc::now()),
            created_by: Some(req.created_by.clone().unwrap_or_else(|| "unknown".to_string())),
            auto_created: progress.auto_created,
            port: None,
            password: None,
        };
        write_meta(workspace, &meta).await?;

        let port = next_available_port(
            self.runtime.as_ref(),
            self.config.base_port,
            self.config.max_projects,
        )
        .await?;
        let password = generate_password(DEFAULT_PASSWORD_LENGTH);
        let spec = project_container_spec(&self.config.container, name, workspace, port, &password);
        self.runtime
            .create_and_start(&spec)
            .await
            .map_err(PanelError::external)?;

        meta.port = Some(port);
        meta.password = Some(password.clone());
        write_meta(workspace, &meta).await?;

        Ok(CreatedProject {
            name: name.to_string(),
            repo,
            port,
            auto_created: progress.auto_created,
            password,
        })
    }

    /// Global provider credentials overlaid with the project's own keys.
    async fn write_env_file(
        &self,
        workspace: &Path,
        project_keys: &BTreeMap<String, String>,
    ) -> Result<(), PanelError> {
        let mut vars = self.providers.load().await?.env_vars();
        vars.extend(
            project_keys
                .iter()
                .filter(|(k, _)| !k.trim().is_empty())
                .map(|(k, v)| (k.trim().to_string(), v.clone())),
        );
        if vars.is_empty() {
            return Ok(());
        }

        let content: String = vars
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect();
        tokio::fs::write(workspace.join(".env"), content).await?;
        Ok(())
    }

    async fn rollback(&self, name: &str, workspace: &Path, progress: &Progress) {
        // The runtime may have created the container even when create failed.
        match self.runtime.remove(&container_name(name)).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(project = %name, error = %e, "cleanup: failed to remove container")
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(workspace).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(project = %name, error = %e, "cleanup: failed to remove workspace");
            }
        }
        if progress.auto_created {
            self.delete_remote_repo(name).await;
        }
    }

    /// Start the project's container, recreating it from metadata if the
    /// runtime no longer has it.
    pub async fn start(&self, name: &str) -> Result<(), PanelError> {
        validate_name(name)?;
        let workspace = self.config.workspace_dir(name);
        let meta = read_meta(&workspace).await;
        let port = meta.port.ok_or_else(|| {
            PanelError::Validation("Proyecto sin puerto asignado, recréalo".into())
        })?;

        match self.runtime.start(&container_name(name)).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                tracing::info!(project = %name, port, "container missing; recreating");
                let password = meta.password.unwrap_or_default();
                let spec =
                    project_container_spec(&self.config.container, name, &workspace, port, &password);
                self.runtime
                    .create_and_start(&spec)
                    .await
                    .map_err(PanelError::external)?;
            }
            Err(e) => return Err(PanelError::external(e)),
        }
        tracing::info!(project = %name, "project started");
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), PanelError> {
        validate_name(name)?;
        match self.runtime.stop(&container_name(name)).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                return Err(PanelError::NotFound(format!(
                    "Contenedor no encontrado: {}",
                    name
                )));
            }
            Err(e) => return Err(PanelError::external(e)),
        }
        tracing::info!(project = %name, "project stopped");
        Ok(())
    }

    /// Remove the container, the workspace and (for auto-created projects)
    /// the remote repository. Deleting an absent project succeeds.
    pub async fn delete(&self, name: &str) -> Result<(), PanelError> {
        validate_name(name)?;
        let container = container_name(name);
        if let Err(e) = self.runtime.stop(&container).await {
            tracing::debug!(project = %name, error = %e, "stop before delete failed");
        }
        if let Err(e) = self.runtime.remove(&container).await {
            tracing::debug!(project = %name, error = %e, "remove failed");
        }

        let workspace = self.config.workspace_dir(name);
        let meta = read_meta(&workspace).await;
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if meta.auto_created {
            self.delete_remote_repo(name).await;
        }
        tracing::info!(project = %name, "project deleted");
        Ok(())
    }

    pub async fn logs(&self, name: &str, lines: usize) -> Result<String, PanelError> {
        validate_name(name)?;
        let raw = self
            .runtime
            .logs(&container_name(name), lines)
            .await
            .map_err(PanelError::external)?;
        Ok(strip_stream_framing(&raw))
    }

    fn github_token(&self) -> Result<&str, PanelError> {
        self.config
            .github_token
            .as_deref()
            .ok_or_else(|| PanelError::Config("GITHUB_TOKEN no configurado en el servidor".into()))
    }

    async fn delete_remote_repo(&self, name: &str) {
        let Some(token) = self.config.github_token.as_deref() else {
            tracing::warn!(project = %name, "cannot delete auto-created repository without GITHUB_TOKEN");
            return;
        };
        if let Err(e) = self
            .github
            .delete_repo(token, &self.config.github_org, name)
            .await
        {
            tracing::warn!(project = %name, error = %format!("{:#}", e), "failed to delete repository");
        }
    }
}

fn validate_name(name: &str) -> Result<(), PanelError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(PanelError::Validation("Nombre de proyecto inválido".into()))
    }
}
