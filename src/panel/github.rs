use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "opencode-platform";

/// Response from GitHub's device code endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// Response from GitHub's token polling endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub error: Option<String>,
}

/// Result of one device-flow token exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The user has not approved yet (or GitHub asked us to slow down).
    Pending,
    Authorized(String),
    /// Terminal failure: `expired_token`, `access_denied`, ...
    Failed(String),
}

impl From<TokenResponse> for PollOutcome {
    fn from(resp: TokenResponse) -> Self {
        if let Some(token) = resp.access_token {
            return PollOutcome::Authorized(token);
        }
        match resp.error.as_deref() {
            Some("authorization_pending") | Some("slow_down") => PollOutcome::Pending,
            Some(err) => PollOutcome::Failed(err.to_string()),
            None => PollOutcome::Failed("unexpected_response".to_string()),
        }
    }
}

/// Subset of the repository object returned by `POST /orgs/{org}/repos`.
#[derive(Debug, Deserialize)]
pub struct CreatedRepo {
    pub clone_url: String,
}

#[derive(Debug, Serialize)]
struct CreateRepoBody<'a> {
    name: &'a str,
    description: &'a str,
    private: bool,
    auto_init: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorBody {
    message: Option<String>,
}

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; does not verify the token is active or scoped.
pub fn is_valid_github_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Embed a token into an HTTPS clone URL so `git clone` can reach a private
/// repository. Non-HTTPS URLs are returned unchanged.
pub fn with_token_in_url(url: &str, token: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => format!("https://x-access-token:{}@{}", token, rest),
        None => url.to_string(),
    }
}

/// The GitHub operations the panel depends on.
#[async_trait]
pub trait GitHub: Send + Sync {
    /// Create a private, auto-initialised repository in `org`; returns its
    /// HTTPS clone URL.
    async fn create_org_repo(
        &self,
        token: &str,
        org: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<String>;

    async fn delete_repo(&self, token: &str, org: &str, name: &str) -> anyhow::Result<()>;

    /// Start the device flow; returns the device code and the user code to
    /// show to the user.
    async fn request_device_code(
        &self,
        client_id: &str,
        scope: &str,
    ) -> anyhow::Result<DeviceCodeResponse>;

    /// Exchange a device code for a token, once.
    async fn poll_for_token(&self, client_id: &str, device_code: &str)
    -> anyhow::Result<PollOutcome>;
}

/// `GitHub` over HTTPS with `reqwest`.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    fn api_request(&self, method: reqwest::Method, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

/// Turn a non-success GitHub response into an error carrying GitHub's own
/// `message` when it sent one.
async fn check_status(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<GitHubErrorBody>()
        .await
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("GitHub API error {}", status.as_u16()));
    anyhow::bail!(message)
}

#[async_trait]
impl GitHub for GitHubClient {
    async fn create_org_repo(
        &self,
        token: &str,
        org: &str,
        name: &str,
        description: &str,
    ) -> anyhow::Result<String> {
        let body = CreateRepoBody {
            name,
            description,
            private: true,
            auto_init: true,
        };
        let resp = self
            .api_request(reqwest::Method::POST, &format!("/orgs/{}/repos", org), token)
            .json(&body)
            .send()
            .await
            .context("Failed to send create-repository request to GitHub")?;
        let repo = check_status(resp)
            .await?
            .json::<CreatedRepo>()
            .await
            .context("Failed to parse create-repository response from GitHub")?;
        Ok(repo.clone_url)
    }

    async fn delete_repo(&self, token: &str, org: &str, name: &str) -> anyhow::Result<()> {
        let resp = self
            .api_request(reqwest::Method::DELETE, &format!("/repos/{}/{}", org, name), token)
            .send()
            .await
            .context("Failed to send delete-repository request to GitHub")?;
        check_status(resp).await?;
        Ok(())
    }

    async fn request_device_code(
        &self,
        client_id: &str,
        scope: &str,
    ) -> anyhow::Result<DeviceCodeResponse> {
        let resp = self
            .http
            .post(GITHUB_DEVICE_CODE_URL)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .form(&[("client_id", client_id), ("scope", scope)])
            .send()
            .await
            .context("Failed to send device code request to GitHub")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!(
                "GitHub rejected the OAuth client ID. Ensure COPILOT_CLIENT_ID names an OAuth \
                 App with Device Flow enabled."
            );
        }

        let resp = resp
            .error_for_status()
            .context("GitHub device code endpoint returned error status")?;
        resp.json::<DeviceCodeResponse>()
            .await
            .context("Failed to parse device code response from GitHub")
    }

    async fn poll_for_token(
        &self,
        client_id: &str,
        device_code: &str,
    ) -> anyhow::Result<PollOutcome> {
        let resp = self
            .http
            .post(GITHUB_TOKEN_URL)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .form(&[
                ("client_id", client_id),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await
            .context("Failed to send token poll request to GitHub")?
            .json::<TokenResponse>()
            .await
            .context("Failed to parse token poll response from GitHub")?;
        Ok(resp.into())
    }
}
