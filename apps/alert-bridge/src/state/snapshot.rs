//! Serializable whole-state snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{OrderOutcome, PositionRecord};

/// One memoized alert outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    /// Stored terminal outcome.
    pub outcome: OrderOutcome,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
}

/// The full persisted state: positions plus the processed-alert log.
///
/// Always replaced as a whole on disk; never partially overwritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Open positions keyed by instrument key.
    #[serde(default)]
    pub positions: HashMap<String, PositionRecord>,
    /// Processed-alert log keyed by idempotency key.
    #[serde(default)]
    pub processed: HashMap<String, ProcessedEntry>,
}

impl StateSnapshot {
    /// Drop processed entries outside the retention window, then enforce the
    /// hard cap by evicting oldest-first.
    pub fn prune_processed(&mut self, now: DateTime<Utc>, retention: Duration, cap: usize) {
        self.processed
            .retain(|_, entry| now - entry.timestamp <= retention);

        if self.processed.len() > cap {
            let mut by_age: Vec<(String, DateTime<Utc>)> = self
                .processed
                .iter()
                .map(|(k, e)| (k.clone(), e.timestamp))
                .collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = self.processed.len() - cap;
            for (key, _) in by_age.into_iter().take(excess) {
                self.processed.remove(&key);
            }
        }
    }
}
