//! Risk-bounded quantity sizing.
//!
//! Converts a nominal alert intent into an executable quantity: explicit
//! quantities name whole lots, risk fractions are converted to lots via the
//! configured capital, and the result is clamped to the per-instrument lot
//! and notional ceilings. The executable quantity is always an integer
//! multiple of the lot size. A size that comes out at zero lots is a
//! deliberate no-trade rejection, never silently clamped to zero and never
//! retried.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AlertSide, Instrument, SizeSpec};

/// Configured risk ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Account capital used by the risk-fraction formula.
    pub capital: Decimal,
    /// Maximum lots per order per instrument.
    pub max_lots_per_instrument: i64,
    /// Maximum notional per order per instrument.
    pub max_notional_per_instrument: Decimal,
    /// Maximum simultaneously open positions across the account.
    pub max_open_positions: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            capital: Decimal::from(500_000),
            max_lots_per_instrument: 10,
            max_notional_per_instrument: Decimal::from(2_000_000),
            max_open_positions: 5,
        }
    }
}

/// Deliberate no-trade outcome from sizing. Not retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskRejection {
    /// Requested size rounds down to zero whole lots.
    #[error("requested size rounds to zero lots (lot size {lot_size})")]
    ZeroLots {
        /// Instrument lot size.
        lot_size: i64,
    },

    /// Risk fraction outside (0, 1].
    #[error("risk fraction {fraction} outside (0, 1]")]
    InvalidFraction {
        /// The offending fraction.
        fraction: Decimal,
    },

    /// Risk-fraction or notional sizing needs a reference price the alert
    /// did not carry.
    #[error("alert carries no reference price for risk sizing")]
    MissingReferencePrice,

    /// The notional ceiling leaves no room for even one lot.
    #[error("one lot notional {lot_notional} exceeds ceiling {ceiling}")]
    NotionalCeiling {
        /// Notional of a single lot.
        lot_notional: Decimal,
        /// Configured ceiling.
        ceiling: Decimal,
    },

    /// Opening a new position would exceed the account position-count cap.
    #[error("open position count {open} at configured cap {cap}")]
    PositionCount {
        /// Currently open positions.
        open: usize,
        /// Configured cap.
        cap: usize,
    },
}

/// Inputs to one sizing decision.
#[derive(Debug, Clone)]
pub struct SizingInput<'a> {
    /// Instrument being traded.
    pub instrument: &'a Instrument,
    /// Requested size from the alert.
    pub size: SizeSpec,
    /// Trade side; determines the sign of the result.
    pub side: AlertSide,
    /// Reference (spot) price from the alert, if any.
    pub reference_price: Option<Decimal>,
    /// Whether a position is already open for this instrument key.
    pub has_open_position: bool,
    /// Open position count across the account.
    pub account_open_positions: usize,
}

/// Result of a successful sizing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingResult {
    /// Whole lots to trade.
    pub lots: i64,
    /// Signed quantity in units (lots x lot size, negative for sell).
    pub signed_quantity: i64,
    /// Order notional when a reference price was available.
    pub notional: Option<Decimal>,
    /// True when a ceiling reduced the requested size.
    pub was_constrained: bool,
}

/// Sizes alert intents within configured risk limits.
#[derive(Debug, Clone, Default)]
pub struct QuantitySizer {
    limits: RiskLimits,
}

impl QuantitySizer {
    /// Create a sizer with the given limits.
    #[must_use]
    pub const fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Size an alert intent for an instrument.
    ///
    /// # Errors
    ///
    /// Returns a [`RiskRejection`] when the intent cannot be sized within
    /// the configured limits. Callers must treat this as a terminal
    /// no-trade outcome, not a retryable error.
    pub fn size(&self, input: &SizingInput<'_>) -> Result<SizingResult, RiskRejection> {
        let lot_size = input.instrument.lot_size.max(1);

        if !input.has_open_position
            && input.account_open_positions >= self.limits.max_open_positions
        {
            return Err(RiskRejection::PositionCount {
                open: input.account_open_positions,
                cap: self.limits.max_open_positions,
            });
        }

        let mut lots = match input.size {
            SizeSpec::Quantity(lots_requested) => {
                if lots_requested <= 0 {
                    return Err(RiskRejection::ZeroLots { lot_size });
                }
                lots_requested
            }
            SizeSpec::RiskFraction(fraction) => {
                if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
                    return Err(RiskRejection::InvalidFraction { fraction });
                }
                let price = input
                    .reference_price
                    .filter(|p| *p > Decimal::ZERO)
                    .ok_or(RiskRejection::MissingReferencePrice)?;
                let lot_notional = price * Decimal::from(lot_size);
                (self.limits.capital * fraction / lot_notional)
                    .floor()
                    .to_i64()
                    .unwrap_or(0)
            }
        };

        if lots == 0 {
            return Err(RiskRejection::ZeroLots { lot_size });
        }

        let mut was_constrained = false;
        if lots > self.limits.max_lots_per_instrument {
            lots = self.limits.max_lots_per_instrument;
            was_constrained = true;
        }

        let notional = input.reference_price.filter(|p| *p > Decimal::ZERO).map(|price| {
            let lot_notional = price * Decimal::from(lot_size);
            let ceiling_lots = (self.limits.max_notional_per_instrument / lot_notional)
                .floor()
                .to_i64()
                .unwrap_or(0);
            (lot_notional, ceiling_lots)
        });

        if let Some((lot_notional, ceiling_lots)) = notional {
            if ceiling_lots == 0 {
                return Err(RiskRejection::NotionalCeiling {
                    lot_notional,
                    ceiling: self.limits.max_notional_per_instrument,
                });
            }
            if lots > ceiling_lots {
                lots = ceiling_lots;
                was_constrained = true;
            }
        }

        let units = lots * lot_size;
        let signed_quantity = match input.side {
            AlertSide::Buy => units,
            AlertSide::Sell => -units,
            // Exits are sized from the open position by the executor.
            AlertSide::Exit => units,
        };

        Ok(SizingResult {
            lots,
            signed_quantity,
            notional: notional.map(|(lot_notional, _)| lot_notional * Decimal::from(lots)),
            was_constrained,
        })
    }
}
