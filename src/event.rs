//! Build events published by Cloud Build

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::NotifyError;

/// Status of a build or of one of its steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum BuildStatus {
    #[default]
    StatusUnknown,
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
    /// A status this crate does not know, kept verbatim.
    Unknown(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::StatusUnknown => "STATUS_UNKNOWN",
            BuildStatus::Pending => "PENDING",
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Working => "WORKING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::InternalError => "INTERNAL_ERROR",
            BuildStatus::Timeout => "TIMEOUT",
            BuildStatus::Cancelled => "CANCELLED",
            BuildStatus::Expired => "EXPIRED",
            BuildStatus::Unknown(raw) => raw,
        }
    }
}

impl From<String> for BuildStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "STATUS_UNKNOWN" => BuildStatus::StatusUnknown,
            "PENDING" => BuildStatus::Pending,
            "QUEUED" => BuildStatus::Queued,
            "WORKING" => BuildStatus::Working,
            "SUCCESS" => BuildStatus::Success,
            "FAILURE" => BuildStatus::Failure,
            "INTERNAL_ERROR" => BuildStatus::InternalError,
            "TIMEOUT" => BuildStatus::Timeout,
            "CANCELLED" => BuildStatus::Cancelled,
            "EXPIRED" => BuildStatus::Expired,
            _ => BuildStatus::Unknown(raw),
        }
    }
}

impl From<BuildStatus> for String {
    fn from(status: BuildStatus) -> Self {
        match status {
            BuildStatus::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BuildStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: BuildStatus,
}

/// Build-system metadata attached to a build
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(from = "RawSubstitutions")]
pub struct Substitutions {
    #[serde(rename = "COMMIT_SHA")]
    pub commit_sha: String,
    #[serde(rename = "REPO_NAME")]
    pub repo_name: String,
    #[serde(rename = "BRANCH_NAME")]
    pub branch_name: String,
    #[serde(rename = "NAMESPACE")]
    pub namespace: String,
}

/// Substitutions as published. Cloud Build user substitutions carry a leading
/// underscore, so the namespace may arrive under either key, or both.
#[derive(Deserialize)]
struct RawSubstitutions {
    #[serde(rename = "COMMIT_SHA", default)]
    commit_sha: String,
    #[serde(rename = "REPO_NAME", default)]
    repo_name: String,
    #[serde(rename = "BRANCH_NAME", default)]
    branch_name: String,
    #[serde(rename = "NAMESPACE")]
    namespace: Option<String>,
    #[serde(rename = "_NAMESPACE")]
    user_namespace: Option<String>,
}

impl From<RawSubstitutions> for Substitutions {
    fn from(raw: RawSubstitutions) -> Self {
        Self {
            commit_sha: raw.commit_sha,
            repo_name: raw.repo_name,
            branch_name: raw.branch_name,
            namespace: raw.namespace.or(raw.user_namespace).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BuildEvent {
    pub status: BuildStatus,
    #[serde(default)]
    pub steps: Vec<BuildStep>,
    #[serde(default)]
    pub substitutions: Substitutions,
}

impl BuildEvent {
    /// Decode a message payload. Unknown fields are ignored; `status` is required.
    pub fn decode(payload: &[u8]) -> Result<Self, NotifyError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Returns the id of the failed step. When several steps failed the last one is reported.
    pub fn failed_step(&self) -> Option<&str> {
        let mut failed = None;
        for step in &self.steps {
            if step.status == BuildStatus::Failure {
                failed = Some(step.id.as_str());
            }
        }
        failed
    }

    pub fn repo(&self) -> &str {
        &self.substitutions.repo_name
    }

    pub fn branch(&self) -> &str {
        &self.substitutions.branch_name
    }
}
