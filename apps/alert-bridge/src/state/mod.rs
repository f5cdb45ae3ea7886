//! Durable state store: open positions and the processed-alert log.
//!
//! Every mutation stages a full copy of the state, persists it to a sibling
//! temp file, atomically renames it over the previous file, and only then
//! publishes the new state in memory. A crash mid-write therefore leaves
//! either the old or the new file on disk, never a hybrid.
//!
//! Mutations to the same instrument key are serialized through a per-key
//! async lock handed to the executor; mutations to different keys proceed
//! independently. `record_processed` is visible to subsequent
//! `processed_outcome` calls before it returns.

mod snapshot;

pub use snapshot::{ProcessedEntry, StateSnapshot};

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::models::{OrderOutcome, PositionRecord};

/// State store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file IO failure.
    #[error("state file IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but cannot be parsed. Fatal at startup: the
    /// process must not trade on an empty state it did not choose.
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt {
        /// Path of the corrupt file.
        path: PathBuf,
        /// Parse failure detail.
        reason: String,
    },

    /// Serialization of the staged state failed.
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable store for positions and processed-alert outcomes.
pub struct StateStore {
    path: PathBuf,
    snapshot: StdMutex<StateSnapshot>,
    key_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    retention: Duration,
    processed_cap: usize,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open the store, loading existing state from `path`.
    ///
    /// A missing file is a fresh start; an unreadable or unparseable file is
    /// an error the caller must treat as fatal.
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] when the file exists but cannot be read;
    /// [`StateError::Corrupt`] when it cannot be parsed.
    pub fn open(
        path: impl Into<PathBuf>,
        retention: Duration,
        processed_cap: usize,
    ) -> Result<Self, StateError> {
        let path = path.into();
        let snapshot = match std::fs::read(&path) {
            Ok(bytes) => {
                let parsed: StateSnapshot =
                    serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                info!(
                    path = %path.display(),
                    positions = parsed.positions.len(),
                    processed = parsed.processed.len(),
                    "State loaded"
                );
                parsed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state file, starting fresh");
                StateSnapshot::default()
            }
            Err(e) => {
                return Err(StateError::Io {
                    path,
                    source: e,
                });
            }
        };

        Ok(Self {
            path,
            snapshot: StdMutex::new(snapshot),
            key_locks: StdMutex::new(HashMap::new()),
            retention,
            processed_cap,
        })
    }

    /// Per-instrument-key update lock. Callers hold it across the whole
    /// validate-submit-record sequence.
    #[must_use]
    pub fn key_lock(&self, instrument_key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = lock_or_recover(&self.key_locks);
        Arc::clone(
            locks
                .entry(instrument_key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Stored outcome for an idempotency key, if the alert was already
    /// processed.
    #[must_use]
    pub fn processed_outcome(&self, idempotency_key: &str) -> Option<OrderOutcome> {
        lock_or_recover(&self.snapshot)
            .processed
            .get(idempotency_key)
            .map(|entry| entry.outcome.clone())
    }

    /// Record a terminal outcome for an idempotency key. Durable before
    /// return; prunes the processed log to the retention window and cap.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] when the staged state cannot be persisted;
    /// in that case the in-memory state is left unchanged.
    pub fn record_processed(
        &self,
        idempotency_key: &str,
        outcome: OrderOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.mutate(|state| {
            state.processed.insert(
                idempotency_key.to_string(),
                ProcessedEntry { outcome, timestamp: now },
            );
            state.prune_processed(now, self.retention, self.processed_cap);
        })
    }

    /// Current position for an instrument key.
    #[must_use]
    pub fn position(&self, instrument_key: &str) -> Option<PositionRecord> {
        lock_or_recover(&self.snapshot)
            .positions
            .get(instrument_key)
            .cloned()
    }

    /// All open positions.
    #[must_use]
    pub fn open_positions(&self) -> Vec<PositionRecord> {
        lock_or_recover(&self.snapshot)
            .positions
            .values()
            .cloned()
            .collect()
    }

    /// Count of open positions.
    #[must_use]
    pub fn open_position_count(&self) -> usize {
        lock_or_recover(&self.snapshot).positions.len()
    }

    /// Merge a fill into the position for `instrument_key`: creates the
    /// record on first fill, removes it when the resulting quantity is
    /// exactly zero. Accepts repeated fill events per order id.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] when the staged state cannot be persisted;
    /// the in-memory state is left unchanged.
    pub fn apply_fill(
        &self,
        instrument_key: &str,
        fill_quantity: i64,
        fill_price: Option<Decimal>,
        order_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        self.mutate(|state| {
            let next_quantity = state
                .positions
                .get(instrument_key)
                .map_or(0, |p| p.quantity)
                + fill_quantity;

            if next_quantity == 0 {
                state.positions.remove(instrument_key);
                debug!(instrument_key, order_id, "Position closed");
                return;
            }

            let entry = state
                .positions
                .entry(instrument_key.to_string())
                .or_insert_with(|| PositionRecord {
                    instrument_key: instrument_key.to_string(),
                    quantity: 0,
                    avg_entry_price: Decimal::ZERO,
                    last_order_id: String::new(),
                    updated_at: timestamp,
                });

            if let Some(price) = fill_price {
                entry.avg_entry_price = weighted_entry(
                    entry.quantity,
                    entry.avg_entry_price,
                    fill_quantity,
                    price,
                );
            }
            entry.quantity = next_quantity;
            entry.last_order_id = order_id.to_string();
            entry.updated_at = timestamp;
            debug!(
                instrument_key,
                order_id,
                quantity = next_quantity,
                "Position updated"
            );
        })
    }

    /// Stage a copy, persist it atomically, then publish it in memory.
    fn mutate<F: FnOnce(&mut StateSnapshot)>(&self, apply: F) -> Result<(), StateError> {
        let mut guard = lock_or_recover(&self.snapshot);
        let mut staged = guard.clone();
        apply(&mut staged);
        self.persist(&staged)?;
        *guard = staged;
        Ok(())
    }

    /// Write the snapshot to a sibling temp file, fsync, then rename over
    /// the live file.
    fn persist(&self, state: &StateSnapshot) -> Result<(), StateError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let io_err = |source: std::io::Error, path: &Path| StateError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = std::fs::File::create(&tmp_path).map_err(|e| io_err(e, &tmp_path))?;
        tmp.write_all(&bytes).map_err(|e| io_err(e, &tmp_path))?;
        tmp.sync_all().map_err(|e| io_err(e, &tmp_path))?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| io_err(e, &self.path))
    }
}

/// Average entry only moves when the fill extends the position; reductions
/// and flips keep (or reset to) the fill price.
fn weighted_entry(
    current_quantity: i64,
    current_avg: Decimal,
    fill_quantity: i64,
    fill_price: Decimal,
) -> Decimal {
    let extends = current_quantity == 0
        || (current_quantity > 0) == (fill_quantity > 0);
    if !extends {
        return if (current_quantity + fill_quantity).signum() == current_quantity.signum() {
            current_avg
        } else {
            fill_price
        };
    }

    let current_abs = Decimal::from(current_quantity.abs());
    let fill_abs = Decimal::from(fill_quantity.abs());
    let total = current_abs + fill_abs;
    if total.is_zero() {
        fill_price
    } else {
        (current_avg * current_abs + fill_price * fill_abs) / total
    }
}

/// Mutex poisoning only happens if a holder panicked; the data itself is
/// still the last published snapshot, so recover it.
fn lock_or_recover<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path().join("state.json"), Duration::days(7), 100)
            .expect("open");
        (dir, store)
    }

    #[test]
    fn missing_file_starts_fresh() {
        let (_dir, store) = temp_store();
        assert_eq!(store.open_position_count(), 0);
        assert!(store.processed_outcome("any").is_none());
    }

    #[test]
    fn corrupt_file_refuses_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").expect("write");

        let err = StateStore::open(&path, Duration::days(7), 100).expect_err("corrupt");
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn record_processed_is_visible_immediately_and_durable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path, Duration::days(7), 100).expect("open");

        let outcome = OrderOutcome::Rejected {
            reason: "margin".to_string(),
        };
        store
            .record_processed("abc-1:NIFTY:FUT:buy", outcome.clone(), Utc::now())
            .expect("record");

        assert_eq!(store.processed_outcome("abc-1:NIFTY:FUT:buy"), Some(outcome.clone()));

        // A reopened store sees the same outcome.
        drop(store);
        let reopened = StateStore::open(&path, Duration::days(7), 100).expect("reopen");
        assert_eq!(reopened.processed_outcome("abc-1:NIFTY:FUT:buy"), Some(outcome));
    }

    #[test]
    fn apply_fill_creates_merges_and_removes() {
        let (_dir, store) = temp_store();
        let now = Utc::now();

        store
            .apply_fill("NIFTY:FUT", 75, Some(dec!(100)), "ord-1", now)
            .expect("fill");
        let position = store.position("NIFTY:FUT").expect("position");
        assert_eq!(position.quantity, 75);
        assert_eq!(position.avg_entry_price, dec!(100));

        // Second fill extends and reweights.
        store
            .apply_fill("NIFTY:FUT", 75, Some(dec!(110)), "ord-2", now)
            .expect("fill");
        let position = store.position("NIFTY:FUT").expect("position");
        assert_eq!(position.quantity, 150);
        assert_eq!(position.avg_entry_price, dec!(105));
        assert_eq!(position.last_order_id, "ord-2");

        // Closing fill removes the record entirely.
        store
            .apply_fill("NIFTY:FUT", -150, Some(dec!(107)), "ord-3", now)
            .expect("fill");
        assert!(store.position("NIFTY:FUT").is_none());
        assert_eq!(store.open_position_count(), 0);
    }

    #[test]
    fn processed_log_prunes_beyond_retention() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path().join("state.json"), Duration::hours(1), 100)
            .expect("open");

        let old = Utc::now() - Duration::hours(3);
        store
            .record_processed("old-key", OrderOutcome::NothingToClose, old)
            .expect("record");
        store
            .record_processed("new-key", OrderOutcome::NothingToClose, Utc::now())
            .expect("record");

        assert!(store.processed_outcome("old-key").is_none());
        assert!(store.processed_outcome("new-key").is_some());
    }

    #[test]
    fn state_file_is_always_parseable_after_each_mutation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path, Duration::days(7), 100).expect("open");

        for i in 0..10 {
            store
                .apply_fill("NIFTY:FUT", 75, Some(dec!(100)), &format!("ord-{i}"), Utc::now())
                .expect("fill");
            let bytes = std::fs::read(&path).expect("read");
            let parsed: StateSnapshot = serde_json::from_slice(&bytes).expect("parse");
            assert_eq!(parsed.positions["NIFTY:FUT"].quantity, 75 * (i + 1));
        }
    }

    #[test]
    fn stray_temp_file_does_not_affect_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path, Duration::days(7), 100).expect("open");
        store
            .apply_fill("NIFTY:FUT", 75, None, "ord-1", Utc::now())
            .expect("fill");
        drop(store);

        // Simulate a crash that left a half-written temp file behind.
        std::fs::write(path.with_extension("json.tmp"), b"{\"positions\": {\"TRUNC").expect("write");

        let reopened = StateStore::open(&path, Duration::days(7), 100).expect("reopen");
        assert_eq!(reopened.position("NIFTY:FUT").expect("position").quantity, 75);
    }
}
