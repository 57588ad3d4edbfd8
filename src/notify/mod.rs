//! Operator notifications.
//!
//! Delivery is best-effort: a failed send is logged and never propagated,
//! since a dead Telegram token must not stop trading.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::TelegramConfig;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Fallback sink that only writes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, text: &str) {
        info!(message = text, "notification");
    }
}

/// Telegram bot sink.
pub struct TelegramNotifier {
    http: Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let result = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Telegram rejected notification");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to send Telegram notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sinks are used through Arc<dyn NotificationSink> by the scheduler.
    #[tokio::test]
    async fn test_log_notifier_is_object_safe() {
        let sink: std::sync::Arc<dyn NotificationSink> = std::sync::Arc::new(LogNotifier);
        sink.notify("grid engine started").await;
    }
}
