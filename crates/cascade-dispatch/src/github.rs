//! GitHub Actions `workflow_dispatch` trigger.

use async_trait::async_trait;
use cascade_core::ports::{DispatchInputs, DispatchRequest, WorkflowDispatcher};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
    #[error("GitHub rejected dispatch with {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<DispatchError> for cascade_core::Error {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Http(e) => cascade_core::Error::Network(e.to_string()),
            other => cascade_core::Error::Dispatch(other.to_string()),
        }
    }
}

/// GitHub API settings.
///
/// The token is never serialized and shows as `***` in debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Token with `actions:write` on the target repositories.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("cascade-ci/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Serialize)]
struct DispatchBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    inputs: &'a DispatchInputs,
}

/// Starts jobs through the GitHub Actions workflow dispatch endpoint.
pub struct GithubDispatcher {
    config: GithubConfig,
    base_url: Url,
    client: reqwest::Client,
}

impl GithubDispatcher {
    pub fn new(config: GithubConfig) -> Result<Self, DispatchError> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|_| DispatchError::InvalidUrl(config.api_url.clone()))?;
        if base_url.cannot_be_a_base() {
            return Err(DispatchError::InvalidUrl(config.api_url.clone()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn dispatch_url(&self, request: &DispatchRequest) -> Result<Url, DispatchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DispatchError::InvalidUrl(self.config.api_url.clone()))?
            .pop_if_empty()
            .extend([
                "repos",
                request.repo.owner.as_str(),
                request.repo.name.as_str(),
                "actions",
                "workflows",
                request.workflow_id.as_str(),
                "dispatches",
            ]);
        Ok(url)
    }

    async fn send(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        let url = self.dispatch_url(request)?;
        debug!(%url, job_id = %request.inputs.id, "Sending workflow dispatch");

        let body = DispatchBody {
            git_ref: &request.git_ref,
            inputs: &request.inputs,
        };
        let mut http = self.client.post(url).json(&body);
        if let Some(ref token) = self.config.token {
            http = http.bearer_auth(token);
        }

        let response = http.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }

        info!(
            repo = %request.repo,
            workflow = %request.workflow_id,
            job_id = %request.inputs.id,
            "Workflow dispatched"
        );
        Ok(())
    }
}

#[async_trait]
impl WorkflowDispatcher for GithubDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> cascade_core::Result<()> {
        self.send(request).await.map_err(Into::into)
    }
}
