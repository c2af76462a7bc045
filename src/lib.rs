pub mod error;
pub mod event;
pub mod format;
pub mod github;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod subscriber;
pub mod utils;

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{NotifyError, Result};

const DEFAULT_SUBSCRIPTION: &str = "cloudBuildSub";
const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const DEFAULT_READY_DELAY_SECS: u64 = 6 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_TEST_NAMESPACE: &str = "test";

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default = "default_subscription")]
    pub subscription: String,
    #[serde(default = "default_branches")]
    pub branches: Vec<String>,
    pub http_timeout_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub github: GithubConfig,
    #[serde(default)]
    pub repo: Vec<RepoConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_base: String,
    pub owner: String,
}

/// How build events of one repository are announced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    /// A deployed web app: successes and failures are both announced.
    Deployment,
    /// A project whose builds are only announced when they fail.
    Build,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub kind: RepoKind,
    pub app_name: Option<String>,
    pub url: Option<String>,
    pub ready_delay_secs: Option<u64>,
    pub test_namespace: Option<String>,
}

fn default_subscription() -> String {
    DEFAULT_SUBSCRIPTION.to_string()
}

fn default_branches() -> Vec<String> {
    vec!["dev".to_string(), "master".to_string()]
}

fn default_github_api() -> String {
    DEFAULT_GITHUB_API.to_string()
}

impl NotifyConfig {
    /// Returns true if events on `branch` should be announced at all.
    pub fn watches_branch(&self, branch: &str) -> bool {
        self.branches.iter().any(|b| b == branch)
    }

    pub fn get_http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    pub fn get_shutdown_grace(&self) -> Duration {
        Duration::from_secs(
            self.shutdown_grace_secs
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.github.owner.is_empty() {
            return Err(NotifyError::ConfigError(
                "github.owner must not be empty".to_string(),
            ));
        }
        for repo in &self.repo {
            if repo.kind == RepoKind::Deployment && (repo.app_name.is_none() || repo.url.is_none())
            {
                return Err(NotifyError::ConfigError(format!(
                    "Repository '{}' is a deployment and needs both app_name and url",
                    repo.name
                )));
            }
        }
        Ok(())
    }
}

impl RepoConfig {
    /// Returns how long a successful deployment is held back before it is announced.
    pub fn get_ready_delay(&self) -> Duration {
        Duration::from_secs(self.ready_delay_secs.unwrap_or(DEFAULT_READY_DELAY_SECS))
    }

    /// Returns the namespace that marks unit-testing builds.
    pub fn get_test_namespace(&self) -> &str {
        self.test_namespace
            .as_deref()
            .unwrap_or(DEFAULT_TEST_NAMESPACE)
    }

    pub fn get_app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or(&self.name)
    }

    pub fn get_url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }
}

/// Credentials and endpoints that only ever come from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub project_id: String,
    pub hangout_url: String,
    pub github_token: String,
    pub subscription_override: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("project_id", &self.project_id)
            .field("hangout_url", &"<redacted>")
            .field("github_token", &"<redacted>")
            .field("subscription_override", &self.subscription_override)
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the secrets from any key lookup; empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(NotifyError::MissingEnv(key))
        };

        Ok(Self {
            project_id: require("PROJECT_ID")?,
            hangout_url: require("HANGOUT_URL")?,
            github_token: require("GITHUB_TOKEN")?,
            subscription_override: lookup("SUBSCRIPTION_NAME").filter(|v| !v.is_empty()),
        })
    }
}

/// Parse configuration from a TOML string
pub fn parse_config(config_str: &str) -> Result<NotifyConfig> {
    let config: NotifyConfig = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<NotifyConfig> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        NotifyError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&config_str).map_err(|e| {
        NotifyError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}
