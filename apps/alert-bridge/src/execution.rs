//! Order executor: idempotent, serialized, retry-bounded submission.
//!
//! One resolved trade in, one terminal outcome out. The executor owns the
//! critical section around a position: it holds the per-instrument-key lock
//! across replay check, exit revalidation, broker submission, and state
//! recording, so two alerts for the same instrument can never interleave.
//!
//! Replay contract: an idempotency key seen before returns its stored
//! outcome without touching the broker. `Failed` outcomes are not stored,
//! so a re-sent alert may legitimately try again after an outage.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::broker::{BrokerApi, BrokerError, OrderRequest, RetryPolicy, TransactionType};
use crate::models::{
    AlertSide, ExecutionReport, OrderOutcome, OutcomeEvent, ResolvedTrade,
};
use crate::notify::OutcomeNotifier;
use crate::state::{StateError, StateStore};

/// Executes resolved trades against the broker.
pub struct OrderExecutor {
    broker: Arc<dyn BrokerApi>,
    state: Arc<StateStore>,
    notifier: Arc<dyn OutcomeNotifier>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl OrderExecutor {
    /// Build an executor over a broker, state store and notifier.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        state: Arc<StateStore>,
        notifier: Arc<dyn OutcomeNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            state,
            notifier,
            retry,
        }
    }

    /// Execute one resolved trade to a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] only when the durable state cannot be
    /// persisted. Broker failures are expressed through the outcome, never
    /// as an `Err`.
    pub async fn execute(&self, trade: &ResolvedTrade) -> Result<ExecutionReport, StateError> {
        let key = trade.idempotency_key.as_str();
        let instrument_key = trade.instrument_key();

        // Fast path outside the lock.
        if let Some(outcome) = self.state.processed_outcome(key) {
            info!(idempotency_key = %key, outcome = outcome.label(), "Replayed stored outcome");
            return Ok(ExecutionReport {
                outcome,
                replayed: true,
            });
        }

        let lock = self.state.key_lock(&instrument_key);
        let _guard = lock.lock().await;

        // A concurrent request for the same key may have won the race.
        if let Some(outcome) = self.state.processed_outcome(key) {
            info!(idempotency_key = %key, outcome = outcome.label(), "Replayed stored outcome");
            return Ok(ExecutionReport {
                outcome,
                replayed: true,
            });
        }

        // Exits are sized from the authoritative position under the lock.
        let quantity = if trade.side == AlertSide::Exit {
            match self.state.position(&instrument_key) {
                Some(position) => -position.quantity,
                None => {
                    let outcome = OrderOutcome::NothingToClose;
                    self.record(key, &instrument_key, outcome.clone())?;
                    return Ok(ExecutionReport {
                        outcome,
                        replayed: false,
                    });
                }
            }
        } else {
            trade.quantity
        };

        let request = OrderRequest {
            security_id: trade.instrument.security_id.clone(),
            exchange_segment: trade.instrument.exchange_segment.clone(),
            transaction_type: TransactionType::from_signed_quantity(quantity),
            quantity: quantity.abs(),
            correlation_id: key.to_string(),
        };

        let outcome = self.submit(&request, quantity).await;

        if let OrderOutcome::Accepted { broker_order_id, .. } = &outcome {
            self.state.apply_fill(
                &instrument_key,
                quantity,
                trade.reference_price,
                broker_order_id,
                Utc::now(),
            )?;
        }
        self.record(key, &instrument_key, outcome.clone())?;

        Ok(ExecutionReport {
            outcome,
            replayed: false,
        })
    }

    /// Submission loop: transient failures consume the retry budget, a
    /// broker rejection ends it immediately.
    async fn submit(&self, request: &OrderRequest, signed_quantity: i64) -> OrderOutcome {
        let mut backoff = self.retry.backoff();
        loop {
            match self.broker.place_order(request).await {
                Ok(ack) => {
                    info!(
                        correlation_id = %request.correlation_id,
                        order_id = %ack.order_id,
                        quantity = signed_quantity,
                        "Order accepted"
                    );
                    return OrderOutcome::Accepted {
                        broker_order_id: ack.order_id,
                        quantity: signed_quantity,
                    };
                }
                Err(BrokerError::Rejected { reason }) => {
                    warn!(correlation_id = %request.correlation_id, %reason, "Order rejected");
                    return OrderOutcome::Rejected { reason };
                }
                Err(e) => {
                    let hint = e.retry_after();
                    match backoff.next_delay() {
                        Some(delay) => {
                            let wait = hint.map_or(delay, |h| h.max(delay));
                            warn!(
                                correlation_id = %request.correlation_id,
                                error = %e,
                                wait_ms = wait.as_millis() as u64,
                                "Transient broker failure, will retry"
                            );
                            tokio::time::sleep(wait).await;
                        }
                        None => {
                            let attempts = backoff.attempts();
                            warn!(
                                correlation_id = %request.correlation_id,
                                error = %e,
                                attempts,
                                "Retry budget exhausted"
                            );
                            return OrderOutcome::Failed { attempts };
                        }
                    }
                }
            }
        }
    }

    /// Memoize a recordable outcome, then notify off the critical path.
    /// Also used by the pipeline for terminal outcomes decided before
    /// submission, such as risk rejections.
    pub(crate) fn record(
        &self,
        idempotency_key: &str,
        instrument_key: &str,
        outcome: OrderOutcome,
    ) -> Result<(), StateError> {
        let now = Utc::now();
        if outcome.is_recorded() {
            self.state
                .record_processed(idempotency_key, outcome.clone(), now)?;
        }

        let event = OutcomeEvent {
            idempotency_key: idempotency_key.to_string(),
            instrument_key: instrument_key.to_string(),
            outcome,
            timestamp: now,
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&event).await;
        });
        Ok(())
    }
}
