//! Durable state configuration.

use serde::{Deserialize, Serialize};

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the JSON state file.
    #[serde(default = "default_state_path")]
    pub path: String,
    /// Processed-alert retention window in days.
    #[serde(default = "default_retention_days")]
    pub processed_retention_days: i64,
    /// Hard cap on processed-alert entries.
    #[serde(default = "default_processed_cap")]
    pub processed_cap: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            processed_retention_days: default_retention_days(),
            processed_cap: default_processed_cap(),
        }
    }
}

pub(crate) fn default_state_path() -> String {
    "state.json".to_string()
}

pub(crate) const fn default_retention_days() -> i64 {
    7
}

pub(crate) const fn default_processed_cap() -> usize {
    4096
}
