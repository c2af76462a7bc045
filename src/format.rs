//! Turns build events into chat messages.
//!
//! [`classify`] decides from the event alone whether anything is announced and
//! with which template; [`Template::render`] fills the template once the commit
//! metadata is known.

use std::time::Duration;

use crate::event::{BuildEvent, BuildStatus};
use crate::github::CommitInfo;
use crate::utils::find_repo_config;
use crate::{NotifyConfig, RepoKind};

const UNKNOWN_STEP: &str = "unknown";

/// A message ready to be delivered, and how long to hold it back first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub delay: Duration,
}

/// Which message an event produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// A deployment finished and the new version is live.
    Deployed {
        app_name: String,
        url: String,
        ready_delay: Duration,
    },
    /// A deployment stopped on a failed build.
    DeployFailed { app_name: String, url: String },
    /// A plain build failed.
    BuildFailed { build_type: &'static str },
}

/// Label for a failed build: unit tests, nightly or production.
pub fn build_type(namespace: &str, branch: &str, test_namespace: &str) -> &'static str {
    if namespace == test_namespace {
        return "unit-testing";
    }
    if branch == "dev" {
        "nightly"
    } else {
        "production"
    }
}

/// Decide whether `event` is announced, without touching the network.
pub fn classify(event: &BuildEvent, config: &NotifyConfig) -> Option<Template> {
    if !config.watches_branch(event.branch()) {
        return None;
    }

    let repo = find_repo_config(config, event.repo())?;

    match (repo.kind, &event.status) {
        (RepoKind::Deployment, BuildStatus::Success) => Some(Template::Deployed {
            app_name: repo.get_app_name().to_string(),
            url: repo.get_url().to_string(),
            ready_delay: repo.get_ready_delay(),
        }),
        (RepoKind::Deployment, BuildStatus::Failure) => Some(Template::DeployFailed {
            app_name: repo.get_app_name().to_string(),
            url: repo.get_url().to_string(),
        }),
        (RepoKind::Build, BuildStatus::Failure) => Some(Template::BuildFailed {
            build_type: build_type(
                &event.substitutions.namespace,
                event.branch(),
                repo.get_test_namespace(),
            ),
        }),
        _ => None,
    }
}

impl Template {
    /// Hold time before the message may be sent
    pub fn delay(&self) -> Duration {
        match self {
            Template::Deployed { ready_delay, .. } => *ready_delay,
            _ => Duration::ZERO,
        }
    }

    pub fn render(
        &self,
        event: &BuildEvent,
        failed_step: Option<&str>,
        commit: &CommitInfo,
    ) -> Notification {
        let step = failed_step.unwrap_or(UNKNOWN_STEP);
        let headline = match self {
            Template::Deployed { app_name, url, .. } => {
                format!("The new version of *{}* was available in {}.", app_name, url)
            }
            Template::DeployFailed { app_name, url } => format!(
                "The deployment of *{}* on {} has been stopped with status *{}* at step *{}*.",
                app_name, url, event.status, step
            ),
            Template::BuildFailed { build_type } => format!(
                "Cloud build for *{}* has been finished with status *{}* at step *{}*.",
                build_type, event.status, step
            ),
        };

        Notification {
            text: format!("{} Details: {}", headline, details(event, commit)),
            delay: self.delay(),
        }
    }
}

fn details(event: &BuildEvent, commit: &CommitInfo) -> String {
    format!(
        "```Repo: {}\nBranch: {}\nCommit message: {}\nCommit Url: {}\nAuthor: {}({})\nCommitter: {}({})\n```",
        event.repo(),
        event.branch(),
        commit.message,
        commit.html_url,
        commit.author.name,
        commit.author.email,
        commit.committer.name,
        commit.committer.email,
    )
}

/// Format the notification for an event, or `None` if the event is not announced.
pub fn format_message(
    event: &BuildEvent,
    failed_step: Option<&str>,
    commit: &CommitInfo,
    config: &NotifyConfig,
) -> Option<Notification> {
    classify(event, config).map(|template| template.render(event, failed_step, commit))
}
