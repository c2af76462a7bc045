//! Commit lookups against the GitHub REST API

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::NotifyError;

const USER_AGENT_VALUE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Person {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Commit metadata used to enrich a notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CommitInfo {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub author: Person,
    #[serde(default)]
    pub committer: Person,
}

/// Anything that can resolve a commit of a repository into its metadata.
#[async_trait]
pub trait CommitSource: Send + Sync {
    async fn fetch_commit(
        &self,
        commit_sha: &str,
        repo_name: &str,
    ) -> Result<CommitInfo, NotifyError>;
}

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    owner: String,
    token: String,
}

impl GithubClient {
    pub fn new(
        api_base: &str,
        owner: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            token: token.to_string(),
        })
    }

    /// Git data endpoint for one commit
    pub fn commit_url(&self, repo_name: &str, commit_sha: &str) -> String {
        format!(
            "{}/repos/{}/{}/git/commits/{}",
            self.api_base, self.owner, repo_name, commit_sha
        )
    }
}

#[async_trait]
impl CommitSource for GithubClient {
    async fn fetch_commit(
        &self,
        commit_sha: &str,
        repo_name: &str,
    ) -> Result<CommitInfo, NotifyError> {
        let url = self.commit_url(repo_name, commit_sha);
        debug!(%url, "Fetching commit");

        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Basic {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await
            .map_err(|e| NotifyError::FetchError(format!("GET {} failed: {}", url, e)))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| NotifyError::FetchError(format!("Reading {} failed: {}", url, e)))?;

        if !status.is_success() {
            warn!(%status, repo = repo_name, sha = commit_sha, "GitHub returned an error");
            return Err(NotifyError::FetchError(format!(
                "GitHub returned HTTP {} for {}",
                status, url
            )));
        }

        serde_json::from_slice(&body).map_err(|e| {
            NotifyError::FetchError(format!("Response from {} is not a commit: {}", url, e))
        })
    }
}
