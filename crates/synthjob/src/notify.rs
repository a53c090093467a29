//! Completion notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NotificationConfig;
use crate::error::NotifyError;

/// Body posted when a job attempt finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub rid: String,
    pub ok: bool,
}

impl Notification {
    pub fn new(kind: impl Into<String>, rid: impl Into<String>, ok: bool) -> Self {
        Self {
            kind: kind.into(),
            rid: rid.into(),
            ok,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(rid = %notification.rid, "No webhook configured, skipping notification");
        Ok(())
    }
}

/// Posts notifications as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Request {
                endpoint: self.endpoint.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }
        tracing::debug!(rid = %notification.rid, ok = notification.ok, "Webhook notified");
        Ok(())
    }
}

/// Picks the notifier for the configuration.
pub fn from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match config.webhook {
        Some(ref endpoint) if !endpoint.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Arc::new(NoopNotifier)),
    }
}
