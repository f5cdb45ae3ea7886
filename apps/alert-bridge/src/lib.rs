// Allow unwrap/expect and other test-only patterns in test code.
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! Alert Bridge - webhook alerts to brokerage orders.
//!
//! Receives TradingView-style webhook alerts, normalizes symbols, resolves
//! derivative expiries against the instrument catalog, sizes trades within
//! risk limits, and submits orders to the broker with bounded retries.
//! Every alert carries an idempotency key; replays return the stored
//! outcome without resubmitting.
//!
//! # Pipeline
//!
//! ```text
//! webhook -> normalize -> resolve expiry -> catalog lookup
//!         -> risk sizing -> execute (retry, record, notify)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Brokerage order API: port, HTTP client, retry policy.
pub mod broker;

/// Instrument catalog built from the scrip-master dataset.
pub mod catalog;

/// Configuration loading and validation.
pub mod config;

/// Order executor.
pub mod execution;

/// Contract expiry resolution.
pub mod expiry;

/// Core domain types.
pub mod models;

/// Outcome notifications.
pub mod notify;

/// Alert pipeline.
pub mod pipeline;

/// Risk-bounded quantity sizing.
pub mod risk;

/// HTTP server.
pub mod server;

/// Durable positions and processed-alert state.
pub mod state;

/// Symbol normalization.
pub mod symbols;

/// Tracing setup.
pub mod telemetry;

pub use broker::{BrokerApi, BrokerError, DhanClient, RetryPolicy};
pub use catalog::InstrumentCatalog;
pub use config::{Config, load_config};
pub use execution::OrderExecutor;
pub use expiry::ExpiryResolver;
pub use models::{
    AlertIntent, AlertSide, ExecutionReport, Instrument, InstrumentClass, OrderOutcome,
    idempotency_key,
};
pub use pipeline::{AlertError, AlertPipeline};
pub use risk::{QuantitySizer, RiskLimits};
pub use server::{AppState, create_router};
pub use state::StateStore;
pub use symbols::SymbolNormalizer;
