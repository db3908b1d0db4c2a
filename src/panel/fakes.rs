//! In-memory stand-ins for the external clients, used by the panel's unit
//! tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::git::RepoCloner;
use super::github::{DeviceCodeResponse, GitHub, PollOutcome};
use super::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError};

#[derive(Default)]
pub struct FakeGitHub {
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    polls: Mutex<VecDeque<PollOutcome>>,
}

impl FakeGitHub {
    pub fn push_poll(&self, outcome: PollOutcome) {
        self.polls.lock().unwrap().push_back(outcome);
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitHub for FakeGitHub {
    async fn create_org_repo(
        &self,
        _token: &str,
        org: &str,
        name: &str,
        _description: &str,
    ) -> anyhow::Result<String> {
        self.created.lock().unwrap().push(name.to_string());
        Ok(format!("https://github.com/{}/{}.git", org, name))
    }

    async fn delete_repo(&self, _token: &str, _org: &str, name: &str) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn request_device_code(
        &self,
        _client_id: &str,
        _scope: &str,
    ) -> anyhow::Result<DeviceCodeResponse> {
        Ok(DeviceCodeResponse {
            device_code: "dc_fake".into(),
            user_code: "ABCD-1234".into(),
            verification_uri: "https://github.com/login/device".into(),
            expires_in: 900,
            interval: 5,
        })
    }

    async fn poll_for_token(
        &self,
        _client_id: &str,
        _device_code: &str,
    ) -> anyhow::Result<PollOutcome> {
        Ok(self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollOutcome::Pending))
    }
}

/// Clones by creating the destination with a README in it. Set `fail` to make
/// every clone error out after the directory exists.
#[derive(Default)]
pub struct FakeCloner {
    pub fail: bool,
    pub urls: Mutex<Vec<String>>,
}

impl FakeCloner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoCloner for FakeCloner {
    async fn clone_repo(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        self.urls.lock().unwrap().push(url.to_string());
        tokio::fs::create_dir_all(dest).await?;
        if self.fail {
            anyhow::bail!("git clone failed: repository not found");
        }
        tokio::fs::write(dest.join("README.md"), "# fake\n").await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub running: bool,
}

/// Containers keyed by name. `foreign_ports` simulates ports held by
/// containers the panel does not own. `fail_start_after_create` leaves the
/// container registered but stopped and reports the start error, the way the
/// runtime behaves when the host port is already taken.
#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Mutex<HashMap<String, FakeContainer>>,
    pub foreign_ports: Mutex<HashSet<u16>>,
    pub fail_create: bool,
    pub fail_start_after_create: bool,
}

impl FakeRuntime {
    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.containers.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if self.fail_create {
            return Err(RuntimeError::Api("image not found".into()));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::Api(format!("Conflict: {} already in use", spec.name)));
        }
        containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: !self.fail_start_after_create,
            },
        );
        if self.fail_start_after_create {
            return Err(RuntimeError::Api("port is already allocated".into()));
        }
        Ok(format!("{:0>64}", containers.len()))
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self.containers.lock().unwrap().get_mut(name) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        match self.containers.lock().unwrap().get_mut(name) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.containers
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn inspect(&self, name: &str, _internal_port: u16) -> Result<ContainerStatus, RuntimeError> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        Ok(ContainerStatus {
            running: c.running,
            host_port: Some(c.spec.host_port),
            id: Some("0123456789ab".into()),
        })
    }

    async fn published_ports(&self) -> Result<HashSet<u16>, RuntimeError> {
        let mut ports: HashSet<u16> = self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|c| c.spec.host_port)
            .collect();
        ports.extend(self.foreign_ports.lock().unwrap().iter().copied());
        Ok(ports)
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<u8>, RuntimeError> {
        if !self.containers.lock().unwrap().contains_key(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        let lines: Vec<String> = (1..=100).map(|i| format!("line {}", i)).collect();
        let start = lines.len().saturating_sub(tail);
        let mut out = Vec::new();
        for line in &lines[start..] {
            // Stream header: stdout marker plus a zeroed size.
            out.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        Ok(out)
    }
}
