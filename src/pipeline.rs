//! Processing of a single build event, from payload bytes to chat message.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::NotifyConfig;
use crate::event::BuildEvent;
use crate::format::classify;
use crate::github::{CommitInfo, CommitSource};
use crate::notify::ChatSink;
use crate::utils::truncate_for_log;

const MAX_LOGGED_PAYLOAD: usize = 200;

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Skipped,
    DeliveryFailed,
}

#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub id: String,
    pub received_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: Outcome,
}

/// An announced event that has not been delivered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub id: String,
    pub repo: String,
    pub branch: String,
    pub received_at: DateTime<Utc>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

/// Removes an event from the in-flight map when its processing ends, however it ends.
struct InFlightGuard {
    map: InFlightMap,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.map.lock() {
            map.remove(&self.id);
        }
    }
}

/// Runs the decode → classify → enrich → render → deliver chain.
///
/// The event and its message live on the stack of [`Dispatcher::handle`], so any
/// number of events can be processed concurrently. The only shared state is the
/// registry behind [`Dispatcher::in_flight`].
pub struct Dispatcher {
    config: Arc<NotifyConfig>,
    commits: Arc<dyn CommitSource>,
    chat: Arc<dyn ChatSink>,
    in_flight: InFlightMap,
}

impl Dispatcher {
    pub fn new(
        config: Arc<NotifyConfig>,
        commits: Arc<dyn CommitSource>,
        chat: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            config,
            commits,
            chat,
            in_flight: Arc::default(),
        }
    }

    /// Announced events still waiting on enrichment, their ready delay or delivery.
    pub fn in_flight(&self) -> Vec<InFlight> {
        let mut events: Vec<InFlight> = match self.in_flight.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }

    fn track(&self, id: &str, event: &BuildEvent, received_at: DateTime<Utc>) -> InFlightGuard {
        if let Ok(mut map) = self.in_flight.lock() {
            map.insert(
                id.to_string(),
                InFlight {
                    id: id.to_string(),
                    repo: event.repo().to_string(),
                    branch: event.branch().to_string(),
                    received_at,
                },
            );
        }
        InFlightGuard {
            map: self.in_flight.clone(),
            id: id.to_string(),
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> ProcessedEvent {
        let id = Uuid::now_v7().to_string();
        let received_at = Utc::now();
        let span = info_span!("build_event", event_id = %id);

        let outcome = self
            .process(&id, received_at, payload)
            .instrument(span)
            .await;

        ProcessedEvent {
            id,
            received_at,
            completed_at: Utc::now(),
            outcome,
        }
    }

    async fn process(&self, id: &str, received_at: DateTime<Utc>, payload: &[u8]) -> Outcome {
        let event = match BuildEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    payload = %truncate_for_log(&String::from_utf8_lossy(payload), MAX_LOGGED_PAYLOAD),
                    "{}", e
                );
                BuildEvent::default()
            }
        };
        let failed_step = event.failed_step();

        let Some(template) = classify(&event, &self.config) else {
            debug!(
                repo = event.repo(),
                branch = event.branch(),
                status = %event.status,
                "Event is not announced"
            );
            return Outcome::Skipped;
        };

        info!(
            repo = event.repo(),
            branch = event.branch(),
            status = %event.status,
            "Preparing notification"
        );
        let _tracked = self.track(id, &event, received_at);

        let commit = match self
            .commits
            .fetch_commit(&event.substitutions.commit_sha, event.repo())
            .await
        {
            Ok(commit) => commit,
            Err(e) => {
                warn!("{}", e);
                CommitInfo::default()
            }
        };

        let delay = template.delay();
        if !delay.is_zero() {
            info!(
                delay_secs = delay.as_secs(),
                "Waiting for the deployment to become ready"
            );
            tokio::time::sleep(delay).await;
        }

        let notification = template.render(&event, failed_step, &commit);

        match self.chat.send(&notification.text).await {
            Ok(()) => Outcome::Sent,
            Err(e) => {
                error!("{}", e);
                Outcome::DeliveryFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::github::Person;
    use crate::parse_config;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCommits {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl CommitSource for FakeCommits {
        async fn fetch_commit(
            &self,
            commit_sha: &str,
            repo_name: &str,
        ) -> Result<CommitInfo, NotifyError> {
            self.calls
                .lock()
                .unwrap()
                .push((commit_sha.to_string(), repo_name.to_string()));
            if self.fail {
                return Err(NotifyError::FetchError("connection refused".into()));
            }
            Ok(CommitInfo {
                message: "Add dashboards".into(),
                html_url: "https://github.com/o/r/commit/1".into(),
                author: Person {
                    name: "Ann".into(),
                    email: "ann@example.com".into(),
                },
                committer: Person {
                    name: "Bob".into(),
                    email: "bob@example.com".into(),
                },
            })
        }
    }

    #[derive(Default)]
    struct FakeChat {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatSink for FakeChat {
        async fn send(&self, message: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::DeliveryError("HTTP 500".into()));
            }
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn config() -> Arc<NotifyConfig> {
        Arc::new(
            parse_config(
                r#"
                [github]
                owner = "o"

                [[repo]]
                name = "A"
                kind = "deployment"
                app_name = "actable-dev"
                url = "https://dev-nightly.actable.ai"

                [[repo]]
                name = "B"
                kind = "build"
                "#,
            )
            .unwrap(),
        )
    }

    fn payload(repo: &str, branch: &str, status: &str) -> Vec<u8> {
        json!({
            "status": status,
            "steps": [{"id": "build", "status": status}],
            "substitutions": {
                "COMMIT_SHA": "abc123",
                "REPO_NAME": repo,
                "BRANCH_NAME": branch,
                "NAMESPACE": "default"
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_failed_build_is_enriched_and_sent() {
        let commits = Arc::new(FakeCommits::default());
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Dispatcher::new(config(), commits.clone(), chat.clone());

        let processed = dispatcher.handle(&payload("B", "dev", "FAILURE")).await;

        assert_eq!(processed.outcome, Outcome::Sent);
        assert_eq!(
            commits.calls.lock().unwrap().as_slice(),
            &[("abc123".to_string(), "B".to_string())]
        );
        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("*nightly*"));
        assert!(sent[0].contains("at step *build*"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deployment_success_waits_for_ready_delay() {
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Arc::new(Dispatcher::new(
            config(),
            Arc::new(FakeCommits::default()),
            chat.clone(),
        ));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.handle(&payload("A", "dev", "SUCCESS")).await })
        };

        tokio::time::sleep(Duration::from_secs(359)).await;
        assert!(chat.sent.lock().unwrap().is_empty());

        let processed = task.await.unwrap();
        assert_eq!(processed.outcome, Outcome::Sent);
        let sent = chat.sent.lock().unwrap();
        assert!(sent[0].contains("dev-nightly"));
        assert!(sent[0].contains("Author: Ann(ann@example.com)"));
        assert!(sent[0].contains("Committer: Bob(bob@example.com)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_is_in_flight_until_delivered() {
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Arc::new(Dispatcher::new(
            config(),
            Arc::new(FakeCommits::default()),
            chat.clone(),
        ));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.handle(&payload("A", "dev", "SUCCESS")).await })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        let pending = dispatcher.in_flight();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].repo, "A");
        assert_eq!(pending[0].branch, "dev");

        let processed = task.await.unwrap();
        assert_eq!(processed.id, pending[0].id);
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_skipped_event_is_never_in_flight() {
        let dispatcher = Dispatcher::new(
            config(),
            Arc::new(FakeCommits::default()),
            Arc::new(FakeChat::default()),
        );

        let processed = dispatcher.handle(&payload("B", "dev", "SUCCESS")).await;

        assert_eq!(processed.outcome, Outcome::Skipped);
        assert!(dispatcher.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_skipped_without_lookup() {
        let commits = Arc::new(FakeCommits::default());
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Dispatcher::new(config(), commits.clone(), chat.clone());

        let processed = dispatcher.handle(b"{ definitely not json").await;

        assert_eq!(processed.outcome, Outcome::Skipped);
        assert!(commits.calls.lock().unwrap().is_empty());
        assert!(chat.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_sends_with_empty_commit() {
        let commits = Arc::new(FakeCommits {
            fail: true,
            ..Default::default()
        });
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Dispatcher::new(config(), commits, chat.clone());

        let processed = dispatcher.handle(&payload("B", "master", "FAILURE")).await;

        assert_eq!(processed.outcome, Outcome::Sent);
        let sent = chat.sent.lock().unwrap();
        assert!(sent[0].contains("*production*"));
        assert!(sent[0].contains("Commit message: \n"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported_not_raised() {
        let chat = Arc::new(FakeChat {
            fail: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(config(), Arc::new(FakeCommits::default()), chat);

        let processed = dispatcher.handle(&payload("A", "master", "FAILURE")).await;

        assert_eq!(processed.outcome, Outcome::DeliveryFailed);
    }

    #[tokio::test]
    async fn test_concurrent_events_do_not_share_messages() {
        let chat = Arc::new(FakeChat::default());
        let dispatcher = Arc::new(Dispatcher::new(
            config(),
            Arc::new(FakeCommits::default()),
            chat.clone(),
        ));

        let mut tasks = Vec::new();
        for branch in ["dev", "master", "dev", "master"] {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.handle(&payload("B", branch, "FAILURE")).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().outcome, Outcome::Sent);
        }

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent.iter().filter(|m| m.contains("*nightly*")).count(), 2);
        assert_eq!(sent.iter().filter(|m| m.contains("*production*")).count(), 2);
    }
}
