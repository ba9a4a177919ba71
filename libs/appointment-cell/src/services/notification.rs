use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    AppointmentConfirmation,
    AppointmentCancellation,
    PaymentReceipt,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTemplate::AppointmentConfirmation => "appointment_confirmation",
            NotificationTemplate::AppointmentCancellation => "appointment_cancellation",
            NotificationTemplate::PaymentReceipt => "payment_receipt",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Notification endpoint returned {0}")]
    Rejected(u16),
}

/// Best-effort outbound messaging. Callers never let a send failure affect the
/// operation that triggered it.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        destination: &str,
        template: NotificationTemplate,
        data: Value,
    ) -> Result<(), NotificationError>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn send(
        &self,
        destination: &str,
        template: NotificationTemplate,
        data: Value,
    ) -> Result<(), NotificationError> {
        info!(template = template.as_str(), destination, %data, "Notification dispatched");
        Ok(())
    }
}

/// POSTs `{destination, template, data}` to a configured endpoint.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, Duration::from_secs(5))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, url: url.into() }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn send(
        &self,
        destination: &str,
        template: NotificationTemplate,
        data: Value,
    ) -> Result<(), NotificationError> {
        let body = json!({
            "destination": destination,
            "template": template,
            "data": data,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }

        debug!("Webhook accepted {} notification for {}", template.as_str(), destination);
        Ok(())
    }
}

/// Sends on a spawned task; failures are logged and dropped.
pub fn dispatch_in_background(
    notifier: Arc<dyn NotificationDispatcher>,
    destination: String,
    template: NotificationTemplate,
    data: Value,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&destination, template, data).await {
            warn!("Failed to send {} notification to {}: {}", template.as_str(), destination, e);
        }
    })
}
