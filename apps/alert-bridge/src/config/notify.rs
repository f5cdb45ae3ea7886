//! Notification configuration.

use serde::{Deserialize, Serialize};

/// Notification configuration. Absent Telegram settings disable
/// notifications entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Telegram settings, when enabled.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token.
    pub bot_token: String,
    /// Destination chat identifier.
    pub chat_id: String,
}
