//! Brokerage order API port.
//!
//! [`BrokerApi`] is the seam between the order executor and the concrete
//! brokerage. Implementations make exactly one submission attempt per call;
//! retry and backoff live in the executor via [`retry::RetryPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod dhan;
pub mod mock;
pub mod retry;

pub use dhan::DhanClient;
pub use mock::MockBroker;
pub use retry::RetryPolicy;

/// Transaction direction at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    /// Buy to open or to cover.
    Buy,
    /// Sell to open or to close.
    Sell,
}

impl TransactionType {
    /// Direction from a signed quantity. Zero never reaches the broker.
    #[must_use]
    pub const fn from_signed_quantity(quantity: i64) -> Self {
        if quantity >= 0 { Self::Buy } else { Self::Sell }
    }
}

/// A single order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Broker security identifier from the instrument catalog.
    pub security_id: String,
    /// Exchange segment code, for example `NSE_FNO`.
    pub exchange_segment: String,
    /// Buy or sell.
    pub transaction_type: TransactionType,
    /// Unsigned quantity in units, always a whole lot multiple.
    pub quantity: i64,
    /// Caller-assigned correlation tag echoed back by the broker.
    pub correlation_id: String,
}

/// Broker acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAck {
    /// Broker-assigned order identifier.
    pub order_id: String,
    /// Broker-reported order status, for example `TRANSIT`.
    pub status: String,
}

/// Failure placing an order.
///
/// The transient/rejected split drives the executor's retry decision:
/// transient failures are retried within the policy budget, rejections are
/// terminal because resubmitting a rejected order risks duplicate intent.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker examined and refused the order. Never retried.
    #[error("order rejected by broker: {reason}")]
    Rejected {
        /// Broker-supplied rejection reason.
        reason: String,
    },

    /// Transport-level or server-side failure. Retryable.
    #[error("transient broker failure: {0}")]
    Transient(String),

    /// The request did not complete within the client timeout. Retryable.
    #[error("broker request timed out after {timeout:?}")]
    Timeout {
        /// Configured request timeout.
        timeout: Duration,
    },

    /// The broker is throttling this client. Retryable after the hint.
    #[error("rate limited by broker (retry after {retry_after:?})")]
    RateLimited {
        /// Server-suggested wait, when provided.
        retry_after: Option<Duration>,
    },
}

impl BrokerError {
    /// Whether the executor may resubmit after this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Server-suggested minimum wait before the next attempt.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Order submission port implemented by concrete brokerages.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Submit one order. Exactly one attempt; no internal retries.
    async fn place_order(&self, request: &OrderRequest) -> Result<BrokerAck, BrokerError>;
}
