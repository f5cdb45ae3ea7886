//! Scriptable in-memory broker for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BrokerAck, BrokerApi, BrokerError, OrderRequest};

/// Broker double that replays a scripted sequence of results.
///
/// Once the script is exhausted, every further call is accepted with a
/// generated order id. Records every request for assertion.
#[derive(Debug, Default)]
pub struct MockBroker {
    script: Mutex<VecDeque<Result<BrokerAck, BrokerError>>>,
    requests: Mutex<Vec<OrderRequest>>,
}

impl MockBroker {
    /// Broker that accepts everything.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Broker whose next calls fail transiently `failures` times, then accept.
    #[must_use]
    pub fn failing_transiently(failures: usize) -> Self {
        let broker = Self::default();
        for i in 0..failures {
            broker.push(Err(BrokerError::Transient(format!(
                "scripted failure {i}"
            ))));
        }
        broker
    }

    /// Broker that rejects every order with the given reason.
    #[must_use]
    pub fn rejecting(reason: &str) -> Self {
        let broker = Self::default();
        broker.push(Err(BrokerError::Rejected {
            reason: reason.to_string(),
        }));
        broker
    }

    /// Append one scripted result.
    pub fn push(&self, result: Result<BrokerAck, BrokerError>) {
        lock_or_recover(&self.script).push_back(result);
    }

    /// Number of orders submitted so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock_or_recover(&self.requests).len()
    }

    /// Copies of every submitted request, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<OrderRequest> {
        lock_or_recover(&self.requests).clone()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<BrokerAck, BrokerError> {
        lock_or_recover(&self.requests).push(request.clone());
        let scripted = lock_or_recover(&self.script).pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(BrokerAck {
                order_id: format!("mock-{}", self.call_count()),
                status: "TRANSIT".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::TransactionType;

    fn request() -> OrderRequest {
        OrderRequest {
            security_id: "1".to_string(),
            exchange_segment: "NSE_FNO".to_string(),
            transaction_type: TransactionType::Buy,
            quantity: 75,
            correlation_id: "k".to_string(),
        }
    }

    #[tokio::test]
    async fn scripted_failures_then_accept() {
        let broker = MockBroker::failing_transiently(2);

        assert!(broker.place_order(&request()).await.is_err());
        assert!(broker.place_order(&request()).await.is_err());
        assert!(broker.place_order(&request()).await.is_ok());
        assert_eq!(broker.call_count(), 3);
    }

    #[tokio::test]
    async fn records_requests() {
        let broker = MockBroker::accepting();
        broker.place_order(&request()).await.expect("accepted");

        let seen = broker.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].quantity, 75);
    }
}
