//! Trading-calendar configuration.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Expiry-calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Same-day expiry cutoff in exchange-local time (`HH:MM`).
    #[serde(default = "default_expiry_cutoff")]
    pub expiry_cutoff: String,
    /// Exchange trading holidays.
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            expiry_cutoff: default_expiry_cutoff(),
            holidays: Vec::new(),
        }
    }
}

impl TradingConfig {
    /// Parsed cutoff time, if the configured string is valid.
    #[must_use]
    pub fn cutoff_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.expiry_cutoff, "%H:%M").ok()
    }
}

pub(crate) fn default_expiry_cutoff() -> String {
    "15:30".to_string()
}
