//! Outcome notifications.
//!
//! Notification is strictly fire-and-forget: the executor spawns the send
//! off the critical path and failures are logged, never propagated. A lost
//! notification must not affect trading state.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::OutcomeEvent;

/// Notification sink for terminal order outcomes.
#[async_trait]
pub trait OutcomeNotifier: Send + Sync {
    /// Deliver one outcome event. Must not fail the caller.
    async fn notify(&self, event: &OutcomeEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl OutcomeNotifier for NoopNotifier {
    async fn notify(&self, _event: &OutcomeEvent) {}
}

/// Telegram bot notifier.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Default Telegram API endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.telegram.org";

    /// Build a notifier for a bot token and chat.
    #[must_use]
    pub fn new(base_url: &str, bot_token: &str, chat_id: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }

    fn render(event: &OutcomeEvent) -> String {
        format!(
            "{} | {} | {}",
            event.outcome.label(),
            event.instrument_key,
            event.idempotency_key
        )
    }
}

#[async_trait]
impl OutcomeNotifier for TelegramNotifier {
    async fn notify(&self, event: &OutcomeEvent) {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let result = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": Self::render(event),
            }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(idempotency_key = %event.idempotency_key, "Notification sent");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Notification delivery failed");
            }
            Err(e) => {
                warn!(error = %e, "Notification request failed");
            }
        }
    }
}
