//! Core domain types for the alert-to-order pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument class as listed in the scrip master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentClass {
    /// Cash equity.
    Equity,
    /// Futures contract.
    Future,
    /// Options contract.
    Option,
}

impl InstrumentClass {
    /// Short code used in instrument keys and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Equity => "EQ",
            Self::Future => "FUT",
            Self::Option => "OPT",
        }
    }
}

impl std::fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Option contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionType {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

/// Contract-expiry calendar rule for a derivative series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryRule {
    /// Expires every Thursday.
    WeeklyThursday,
    /// Expires on the last Thursday of the month.
    MonthlyLastThursday,
}

/// A tradable instrument loaded from the reference dataset.
///
/// Immutable once loaded; refresh replaces the whole catalog index, never a
/// single record in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Broker security identifier used for order placement.
    pub security_id: String,
    /// Canonical symbol (normalized underlying).
    pub canonical_symbol: String,
    /// Exchange segment (e.g. `NSE_FNO`, `MCX_COMM`).
    pub exchange_segment: String,
    /// Instrument class.
    pub class: InstrumentClass,
    /// Minimum tradable quantity increment.
    pub lot_size: i64,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Contract expiry date (None for equities).
    pub expiry: Option<NaiveDate>,
    /// Strike price (options only).
    pub strike: Option<Decimal>,
    /// Option type (options only).
    pub option_type: Option<OptionType>,
    /// Calendar rule for the expiry series this contract belongs to.
    pub expiry_rule: ExpiryRule,
}

impl Instrument {
    /// Key identifying the position/series this instrument trades under.
    #[must_use]
    pub fn instrument_key(&self) -> String {
        format!("{}:{}", self.canonical_symbol, self.class.code())
    }
}

/// Alert side from the upstream signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSide {
    /// Open or add to a long position.
    Buy,
    /// Open or add to a short position.
    Sell,
    /// Close whatever is currently open for the instrument.
    Exit,
}

impl AlertSide {
    /// Lowercase wire label, also used in idempotency keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Exit => "exit",
        }
    }
}

/// Requested size: either a nominal quantity or a fraction of capital.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSpec {
    /// Explicit requested quantity in whole lots. The executable order
    /// quantity is always lots times the instrument's lot size, so equities
    /// (lot size 1) read as shares.
    Quantity(i64),
    /// Fraction of configured capital to put at risk (0 < f <= 1).
    RiskFraction(Decimal),
}

/// A single inbound alert, one per webhook request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertIntent {
    /// Raw symbol text exactly as received.
    pub raw_symbol: String,
    /// Instrument class to trade.
    pub class: InstrumentClass,
    /// Trade side.
    pub side: AlertSide,
    /// Strike price, for option alerts.
    pub strike: Option<Decimal>,
    /// Option type, for option alerts.
    pub option_type: Option<OptionType>,
    /// Requested size.
    pub size: SizeSpec,
    /// Reference price (spot) supplied by the alert, if any.
    pub reference_price: Option<Decimal>,
    /// Explicit expiry hint, if the alert pins a contract.
    pub expiry_hint: Option<NaiveDate>,
    /// Caller-supplied unique alert identifier.
    pub alert_id: String,
    /// When the alert was received.
    pub received_at: DateTime<Utc>,
}

/// Derive the idempotency key for an alert against an instrument.
///
/// Pure function of (alert id, instrument key, side): replays of the same
/// alert id for the same instrument and side always produce the same key.
#[must_use]
pub fn idempotency_key(alert_id: &str, instrument_key: &str, side: AlertSide) -> String {
    format!("{alert_id}:{instrument_key}:{}", side.as_str())
}

/// A fully resolved, sized trade ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTrade {
    /// Instrument to trade.
    pub instrument: Instrument,
    /// Resolved contract expiry (None for equities).
    pub expiry: Option<NaiveDate>,
    /// Signed quantity in units (positive = buy, negative = sell).
    pub quantity: i64,
    /// Trade side from the originating alert.
    pub side: AlertSide,
    /// Reference price carried from the alert, used for entry tracking.
    pub reference_price: Option<Decimal>,
    /// Idempotency key derived from (alert id, instrument key, side).
    pub idempotency_key: String,
}

impl ResolvedTrade {
    /// Key under which the position for this trade is tracked.
    #[must_use]
    pub fn instrument_key(&self) -> String {
        self.instrument.instrument_key()
    }
}

/// Durable record of an open position, one per instrument key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Instrument key.
    pub instrument_key: String,
    /// Open quantity in units (signed).
    pub quantity: i64,
    /// Average entry reference price.
    pub avg_entry_price: Decimal,
    /// Identifier of the last order that touched this position.
    pub last_order_id: String,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Terminal outcome of executing one resolved trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderOutcome {
    /// Broker accepted the order (fill may still be asynchronous).
    Accepted {
        /// Broker-assigned order identifier.
        broker_order_id: String,
        /// Signed quantity submitted.
        quantity: i64,
    },
    /// Broker itself rejected the order; never retried.
    Rejected {
        /// Broker-reported rejection reason.
        reason: String,
    },
    /// Transient failures exhausted the retry budget. Not recorded as
    /// processed, so a re-sent alert with the same id may try again.
    Failed {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Sizing produced zero lots or breached a risk ceiling. A deliberate
    /// no-trade outcome, not an error.
    RiskRejected {
        /// Why the trade was not sized.
        reason: String,
    },
    /// Exit intent with no open position to close.
    NothingToClose,
}

impl OrderOutcome {
    /// Whether this outcome is memoized in the processed-alert log.
    ///
    /// `Failed` is deliberately excluded: an exhausted retry budget must not
    /// block a legitimate re-send of the same alert.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Short label for logs and notifications.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
            Self::RiskRejected { .. } => "risk_rejected",
            Self::NothingToClose => "nothing_to_close",
        }
    }
}

/// Result of running a trade through the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Terminal outcome.
    pub outcome: OrderOutcome,
    /// True when the outcome was served from the processed-alert log
    /// without contacting the broker.
    pub replayed: bool,
}

/// Outcome event emitted to the notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    /// Idempotency key of the originating trade.
    pub idempotency_key: String,
    /// Instrument key.
    pub instrument_key: String,
    /// Terminal outcome.
    pub outcome: OrderOutcome,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
}
