//! Pub/Sub subscription runner.
//!
//! Every message is acknowledged as soon as it arrives and then handed to the
//! [`Dispatcher`] on its own task. A failure while processing therefore never
//! leads to redelivery.

use async_trait::async_trait;
use google_cloud_pubsub::client::{Client, ClientConfig};
use google_cloud_pubsub::subscriber::ReceivedMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::pipeline::{Dispatcher, InFlight};

/// An inbound message that can be acknowledged.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    fn message_id(&self) -> &str;
    fn payload(&self) -> &[u8];
    async fn ack(&self) -> Result<(), NotifyError>;
}

#[async_trait]
impl Delivery for ReceivedMessage {
    fn message_id(&self) -> &str {
        &self.message.message_id
    }

    fn payload(&self) -> &[u8] {
        &self.message.data
    }

    async fn ack(&self) -> Result<(), NotifyError> {
        ReceivedMessage::ack(self)
            .await
            .map_err(|e| NotifyError::AckError(e.to_string()))
    }
}

/// Acknowledge `delivery`, then process it on a task owned by `tracker`.
pub async fn accept<D: Delivery>(dispatcher: Arc<Dispatcher>, tracker: &TaskTracker, delivery: D) {
    if let Err(e) = delivery.ack().await {
        warn!(message_id = delivery.message_id(), "{}", e);
    }
    debug!(message_id = delivery.message_id(), "Message acknowledged");

    tracker.spawn(async move {
        let processed = dispatcher.handle(delivery.payload()).await;
        debug!(
            message_id = delivery.message_id(),
            event_id = %processed.id,
            outcome = ?processed.outcome,
            "Message processed"
        );
    });
}

pub struct Subscriber {
    client: Client,
    subscription: String,
    dispatcher: Arc<Dispatcher>,
    tracker: TaskTracker,
    shutdown_grace: Duration,
}

impl Subscriber {
    /// Connect to Pub/Sub with application-default credentials.
    pub async fn connect(
        project_id: &str,
        subscription: &str,
        dispatcher: Arc<Dispatcher>,
        shutdown_grace: Duration,
    ) -> Result<Self, NotifyError> {
        let mut config = ClientConfig::default().with_auth().await.map_err(|e| {
            NotifyError::SubscriptionError(format!("Could not load credentials: {}", e))
        })?;
        config.project_id = Some(project_id.to_string());

        let client = Client::new(config).await.map_err(|e| {
            NotifyError::SubscriptionError(format!("Could not create pubsub client: {}", e))
        })?;

        Ok(Self {
            client,
            subscription: subscription.to_string(),
            dispatcher,
            tracker: TaskTracker::new(),
            shutdown_grace,
        })
    }

    /// Receive until `shutdown` is cancelled or the subscription fails.
    ///
    /// Returns `Ok(())` after a requested shutdown and an error when the
    /// receive loop stopped on its own.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), NotifyError> {
        let subscription = self.client.subscription(&self.subscription);
        let dispatcher = self.dispatcher.clone();
        let tracker = self.tracker.clone();

        info!(subscription = %self.subscription, "Receiving build events");

        let result = subscription
            .receive(
                move |message, _cancel| {
                    let dispatcher = dispatcher.clone();
                    let tracker = tracker.clone();
                    async move { accept(dispatcher, &tracker, message).await }
                },
                shutdown.clone(),
                None,
            )
            .await;

        info!("Receive loop ended");
        drain(&self.tracker, &self.dispatcher, self.shutdown_grace).await;

        match result {
            Err(status) => Err(NotifyError::SubscriptionError(status.to_string())),
            Ok(()) if shutdown.is_cancelled() => Ok(()),
            Ok(()) => Err(NotifyError::SubscriptionError(
                "Receive loop ended unexpectedly".to_string(),
            )),
        }
    }
}

/// Wait up to `grace` for the tasks on `tracker`. Events still in flight
/// afterwards are logged one by one and returned.
pub async fn drain(tracker: &TaskTracker, dispatcher: &Dispatcher, grace: Duration) -> Vec<InFlight> {
    tracker.close();
    if tracker.is_empty() {
        return Vec::new();
    }
    info!(in_flight = tracker.len(), "Waiting for in-flight events");
    if tokio::time::timeout(grace, tracker.wait()).await.is_ok() {
        return Vec::new();
    }

    let abandoned = dispatcher.in_flight();
    warn!(
        in_flight = tracker.len(),
        "Shutdown grace period elapsed, abandoning in-flight events"
    );
    for event in &abandoned {
        warn!(
            event_id = %event.id,
            repo = %event.repo,
            branch = %event.branch,
            received_at = %event.received_at,
            "Notification abandoned"
        );
    }
    abandoned
}
