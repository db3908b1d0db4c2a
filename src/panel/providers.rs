//! Provider credentials: a static catalog of model vendors, the global
//! `.providers.json` store, and the Copilot OAuth device flow.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::github::{GitHub, PollOutcome};
use super::meta::write_json_atomic;
use crate::errors::PanelError;

pub const COPILOT_ID: &str = "copilot";
const COPILOT_SCOPE: &str = "read:user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    DeviceFlow,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub name: &'static str,
    /// Environment variable the worker reads the secret from.
    pub env: &'static str,
    pub auth: AuthMethod,
}

pub const PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo { id: "anthropic", name: "Anthropic", env: "ANTHROPIC_API_KEY", auth: AuthMethod::ApiKey },
    ProviderInfo { id: "openai", name: "OpenAI", env: "OPENAI_API_KEY", auth: AuthMethod::ApiKey },
    ProviderInfo { id: "google", name: "Google Gemini", env: "GOOGLE_GENERATIVE_AI_API_KEY", auth: AuthMethod::ApiKey },
    ProviderInfo { id: "openrouter", name: "OpenRouter", env: "OPENROUTER_API_KEY", auth: AuthMethod::ApiKey },
    ProviderInfo { id: "groq", name: "Groq", env: "GROQ_API_KEY", auth: AuthMethod::ApiKey },
    ProviderInfo { id: COPILOT_ID, name: "GitHub Copilot", env: "GITHUB_COPILOT_TOKEN", auth: AuthMethod::DeviceFlow },
];

pub fn find_provider(id: &str) -> Option<&'static ProviderInfo> {
    PROVIDERS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Api,
    Oauth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub key: String,
    pub env: String,
    pub connected_at: DateTime<Utc>,
}

/// Device code handed out by `oauth_start`, waiting for the user to approve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_at: DateTime<Utc>,
}

/// On-disk shape of `.providers.json`: credentials keyed by provider id, plus
/// the reserved `_oauthPending` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersFile {
    #[serde(rename = "_oauthPending", default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingDeviceCode>,
    #[serde(flatten)]
    pub credentials: BTreeMap<String, Credential>,
}

impl ProvidersFile {
    /// Environment variables for every connected provider.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.credentials
            .values()
            .map(|c| (c.env.clone(), c.key.clone()))
            .collect()
    }
}

/// Flat JSON file store. Last write wins.
#[derive(Debug, Clone)]
pub struct ProviderStore {
    path: PathBuf,
}

impl ProviderStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<ProvidersFile, PanelError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PanelError::Config(format!("{} is not valid: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProvidersFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, file: &ProvidersFile) -> Result<(), PanelError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_json_atomic(&self.path, file).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderView {
    pub id: &'static str,
    pub name: &'static str,
    pub env: &'static str,
    pub auth: AuthMethod,
    pub connected: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<CredentialKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthStartView {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Connected,
    Error,
}

#[derive(Debug, Serialize)]
pub struct PollView {
    pub status: PollStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollView {
    fn status(status: PollStatus) -> Self {
        Self { status, error: None }
    }

    fn error(err: impl Into<String>) -> Self {
        Self {
            status: PollStatus::Error,
            error: Some(err.into()),
        }
    }
}

/// Show just enough of a secret to recognise it.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "••••".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Connect/disconnect providers and run the Copilot device flow.
#[derive(Clone)]
pub struct ProviderService {
    store: ProviderStore,
    github: Arc<dyn GitHub>,
    client_id: String,
}

impl ProviderService {
    pub fn new(store: ProviderStore, github: Arc<dyn GitHub>, client_id: String) -> Self {
        Self {
            store,
            github,
            client_id,
        }
    }

    pub async fn list(&self) -> Result<Vec<ProviderView>, PanelError> {
        let file = self.store.load().await?;
        Ok(PROVIDERS
            .iter()
            .map(|info| {
                let cred = file.credentials.get(info.id);
                ProviderView {
                    id: info.id,
                    name: info.name,
                    env: info.env,
                    auth: info.auth,
                    connected: cred.is_some(),
                    kind: cred.map(|c| c.kind),
                    connected_at: cred.map(|c| c.connected_at),
                    preview: cred.map(|c| mask_secret(&c.key)),
                }
            })
            .collect())
    }

    pub async fn connect(&self, id: &str, api_key: &str) -> Result<(), PanelError> {
        let info = find_provider(id)
            .ok_or_else(|| PanelError::NotFound(format!("Proveedor desconocido: {}", id)))?;
        let key = api_key.trim();
        if key.is_empty() {
            return Err(PanelError::Validation("La API key es obligatoria".into()));
        }

        let mut file = self.store.load().await?;
        file.credentials.insert(
            info.id.to_string(),
            Credential {
                kind: CredentialKind::Api,
                key: key.to_string(),
                env: info.env.to_string(),
                connected_at: Utc::now(),
            },
        );
        self.store.save(&file).await?;
        tracing::info!(provider = id, "provider connected");
        Ok(())
    }

    pub async fn disconnect(&self, id: &str) -> Result<(), PanelError> {
        let info = find_provider(id)
            .ok_or_else(|| PanelError::NotFound(format!("Proveedor desconocido: {}", id)))?;
        let mut file = self.store.load().await?;
        if file.credentials.remove(info.id).is_some() {
            self.store.save(&file).await?;
            tracing::info!(provider = id, "provider disconnected");
        }
        Ok(())
    }

    /// Ask GitHub for a Copilot device code and remember it until it is
    /// exchanged or expires.
    pub async fn oauth_start(&self) -> Result<OAuthStartView, PanelError> {
        let code = self
            .github
            .request_device_code(&self.client_id, COPILOT_SCOPE)
            .await?;

        let mut file = self.store.load().await?;
        file.pending = Some(PendingDeviceCode {
            device_code: code.device_code,
            user_code: code.user_code.clone(),
            verification_uri: code.verification_uri.clone(),
            interval: code.interval,
            expires_at: Utc::now() + Duration::seconds(code.expires_in as i64),
        });
        self.store.save(&file).await?;

        Ok(OAuthStartView {
            user_code: code.user_code,
            verification_uri: code.verification_uri,
            expires_in: code.expires_in,
            interval: code.interval,
        })
    }

    /// One token exchange for the pending device code. The caller polls at
    /// the interval GitHub asked for.
    pub async fn oauth_poll(&self) -> Result<PollView, PanelError> {
        let mut file = self.store.load().await?;
        let pending = file
            .pending
            .clone()
            .ok_or_else(|| PanelError::Validation("No hay autenticación pendiente".into()))?;

        if pending.expires_at <= Utc::now() {
            file.pending = None;
            self.store.save(&file).await?;
            return Ok(PollView::error("expired_token"));
        }

        match self
            .github
            .poll_for_token(&self.client_id, &pending.device_code)
            .await?
        {
            PollOutcome::Pending => Ok(PollView::status(PollStatus::Pending)),
            PollOutcome::Authorized(token) => {
                let env = find_provider(COPILOT_ID)
                    .map(|p| p.env)
                    .unwrap_or("GITHUB_COPILOT_TOKEN");
                file.credentials.insert(
                    COPILOT_ID.to_string(),
                    Credential {
                        kind: CredentialKind::Oauth,
                        key: token,
                        env: env.to_string(),
                        connected_at: Utc::now(),
                    },
                );
                file.pending = None;
                self.store.save(&file).await?;
                tracing::info!(provider = COPILOT_ID, "device flow authorized");
                Ok(PollView::status(PollStatus::Connected))
            }
            PollOutcome::Failed(err) => {
                file.pending = None;
                self.store.save(&file).await?;
                tracing::warn!(provider = COPILOT_ID, error = %err, "device flow failed");
                Ok(PollView::error(err))
            }
        }
    }

    pub async fn env_vars(&self) -> Result<BTreeMap<String, String>, PanelError> {
        Ok(self.store.load().await?.env_vars())
    }
}
