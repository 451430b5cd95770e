//! Notification Sink
//!
//! Best-effort alerts from the ops binaries. Delivery failures are logged and
//! swallowed; an alert must never fail the job that raised it.

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::chains::build_http_client;

/// Destination for human-readable alerts.
pub trait Notifier: Send + Sync {
    /// Posts `message`. Never fails.
    fn post<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()>;
}

/// Slack-compatible incoming webhook (`{"text": message}`).
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            url: url.to_string(),
        })
    }

    async fn deliver(&self, message: &str) {
        let result = self
            .client
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(e) = result {
            warn!("⚠️  Failed to deliver notification: {}", e);
        }
    }
}

impl Notifier for WebhookNotifier {
    fn post<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(self.deliver(message))
    }
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn post<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            info!("📣 {}", message);
        })
    }
}

/// Webhook notifier when `NOTIFY_WEBHOOK_URL` is set, log notifier otherwise.
pub fn notifier_from_env() -> Box<dyn Notifier> {
    match std::env::var("NOTIFY_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => match WebhookNotifier::new(url.trim()) {
            Ok(notifier) => Box::new(notifier),
            Err(e) => {
                warn!("⚠️  Webhook notifier unavailable ({:#}), logging instead", e);
                Box::new(LogNotifier)
            }
        },
        _ => Box::new(LogNotifier),
    }
}
