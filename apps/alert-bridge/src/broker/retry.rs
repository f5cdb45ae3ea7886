//! Bounded retry policy for broker calls.
//!
//! The policy object is injected into the order executor rather than being
//! hard-coded in the HTTP client, so tests and callers can bound the retry
//! budget explicitly.
//!
//! Retryable: network errors, timeouts, HTTP 408/429/5xx.
//! Never retried: broker-confirmed rejections (bad request, insufficient
//! margin), since retrying those risks duplicate intent at the broker.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration for broker order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum submission attempts (first try included).
    pub max_attempts: u32,
    /// Initial backoff duration.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter factor (0.2 = +/-20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff iterator for one order submission.
    #[must_use]
    pub const fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempt: 0,
        }
    }
}

/// Exponential backoff state for a single submission.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl Backoff<'_> {
    /// Delay before the next attempt, or `None` once the budget is spent.
    ///
    /// The first call accounts for the first retry (attempt number two).
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let exp = self.policy.multiplier.powi(self.attempt as i32 - 1);
        let base_ms = (self.policy.initial_backoff.as_millis() as f64 * exp)
            .min(self.policy.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(apply_jitter(
            base_ms,
            self.policy.jitter_factor,
        )))
    }

    /// Attempts consumed so far (including the initial one).
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn apply_jitter(base_ms: f64, jitter_factor: f64) -> u64 {
    if jitter_factor <= 0.0 {
        return base_ms as u64;
    }
    let spread = base_ms * jitter_factor;
    let low = (base_ms - spread).max(0.0);
    let high = base_ms + spread;
    rand::rng().random_range(low..=high) as u64
}

/// Whether an HTTP status code should be retried.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || status >= 500
}
