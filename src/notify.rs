//! Chat webhook delivery.
//!
//! Messages are posted to a Google Chat incoming webhook as `{"text": ...}`.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::NotifyError;

/// Destination for formatted notifications.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

pub struct ChatNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl ChatNotifier {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            webhook_url: webhook_url.to_string(),
            http,
        })
    }
}

#[async_trait]
impl ChatSink for ChatNotifier {
    /// Post the message. Only HTTP 200 counts as delivered.
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        debug!(len = message.len(), "Sending chat message");

        let payload = serde_json::json!({ "text": message });

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::DeliveryError(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, %body, "Chat webhook returned error");
            return Err(NotifyError::DeliveryError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        info!("A message has been sent to the chat room: {}", message);
        Ok(())
    }
}
