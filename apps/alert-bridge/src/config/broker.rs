//! Broker connection configuration.

use serde::{Deserialize, Serialize};

use crate::broker::RetryPolicy;

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Order API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Broker client account identifier.
    pub client_id: String,
    /// API access token.
    pub access_token: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry policy for order submission.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            access_token: String::new(),
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

pub(crate) fn default_base_url() -> String {
    "https://api.dhan.co".to_string()
}

pub(crate) const fn default_timeout_secs() -> u64 {
    10
}
