//! Alert pipeline: one webhook alert in, one terminal outcome out.
//!
//! Stages, in order: symbol normalization, expiry resolution, catalog
//! lookup, risk sizing, execution. The first four stages fail terminally
//! without touching state or the broker; a risk rejection is itself a
//! terminal outcome and is memoized like any other.

use std::sync::Arc;

use chrono::Datelike;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::catalog::{CatalogError, InstrumentCatalog};
use crate::execution::OrderExecutor;
use crate::expiry::{ExpiryResolver, NoValidExpiry};
use crate::models::{
    AlertIntent, AlertSide, ExecutionReport, InstrumentClass, OrderOutcome, ResolvedTrade,
    idempotency_key,
};
use crate::risk::{QuantitySizer, SizingInput};
use crate::state::{StateError, StateStore};
use crate::symbols::{SymbolNormalizer, UnrecognizedSymbol};

/// Terminal pipeline failures that never reach the broker.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The raw symbol maps to nothing tradable.
    #[error(transparent)]
    UnrecognizedSymbol(#[from] UnrecognizedSymbol),

    /// No listed contract covers the resolved expiry.
    #[error(transparent)]
    NoValidExpiry(#[from] NoValidExpiry),

    /// Catalog lookup failed or the catalog is stale.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Durable state could not be persisted.
    #[error(transparent)]
    State(#[from] StateError),
}

/// End-to-end alert handler.
pub struct AlertPipeline {
    normalizer: SymbolNormalizer,
    catalog: Arc<InstrumentCatalog>,
    resolver: ExpiryResolver,
    sizer: QuantitySizer,
    state: Arc<StateStore>,
    executor: OrderExecutor,
}

impl std::fmt::Debug for AlertPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertPipeline").finish_non_exhaustive()
    }
}

impl AlertPipeline {
    /// Assemble the pipeline from its collaborators.
    #[must_use]
    pub fn new(
        normalizer: SymbolNormalizer,
        catalog: Arc<InstrumentCatalog>,
        resolver: ExpiryResolver,
        sizer: QuantitySizer,
        state: Arc<StateStore>,
        executor: OrderExecutor,
    ) -> Self {
        Self {
            normalizer,
            catalog,
            resolver,
            sizer,
            state,
            executor,
        }
    }

    /// Run one alert through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns an [`AlertError`] for failures that precede execution. Risk
    /// rejections and broker-level outcomes are reported through the
    /// [`ExecutionReport`], not as errors.
    #[instrument(skip(self, alert), fields(alert_id = %alert.alert_id, symbol = %alert.raw_symbol))]
    pub async fn handle_alert(&self, alert: &AlertIntent) -> Result<ExecutionReport, AlertError> {
        let parsed = self.normalizer.normalize(&alert.raw_symbol)?;
        let canonical = parsed.canonical;
        // A dated spelling like NIFTY24DECFUT overrides the payload class.
        let class = parsed.class.unwrap_or(alert.class);

        let expiry = if class == InstrumentClass::Equity {
            None
        } else {
            let rule = self.catalog.expiry_rule(&canonical);
            let listed = self.catalog.expiries(&canonical, class);
            let hint = alert.expiry_hint.or_else(|| {
                parsed.expiry_month.and_then(|(year, month)| {
                    listed
                        .iter()
                        .copied()
                        .filter(|d| (d.year(), d.month()) == (year, month))
                        .max()
                })
            });
            Some(
                self.resolver
                    .resolve(rule, &listed, alert.received_at, hint)?,
            )
        };

        let instrument =
            self.catalog
                .lookup(&canonical, class, expiry, alert.strike, alert.option_type)?;
        let instrument_key = instrument.instrument_key();
        let key = idempotency_key(&alert.alert_id, &instrument_key, alert.side);

        info!(
            canonical = %canonical,
            instrument_key = %instrument_key,
            expiry = ?expiry,
            side = alert.side.as_str(),
            "Alert resolved"
        );

        // Exits are sized by the executor from the open position; everything
        // else goes through risk sizing. The replay check precedes sizing so
        // a stored outcome is never re-derived.
        let quantity = if alert.side == AlertSide::Exit {
            0
        } else if let Some(outcome) = self.state.processed_outcome(&key) {
            return Ok(ExecutionReport {
                outcome,
                replayed: true,
            });
        } else {
            let sizing = self.sizer.size(&SizingInput {
                instrument: &instrument,
                size: alert.size,
                side: alert.side,
                reference_price: alert.reference_price,
                has_open_position: self.state.position(&instrument_key).is_some(),
                account_open_positions: self.state.open_position_count(),
            });
            match sizing {
                Ok(result) => result.signed_quantity,
                Err(rejection) => {
                    warn!(reason = %rejection, "Alert rejected by risk sizing");
                    let outcome = OrderOutcome::RiskRejected {
                        reason: rejection.to_string(),
                    };
                    self.executor.record(&key, &instrument_key, outcome.clone())?;
                    return Ok(ExecutionReport {
                        outcome,
                        replayed: false,
                    });
                }
            }
        };

        let trade = ResolvedTrade {
            instrument,
            expiry,
            quantity,
            side: alert.side,
            reference_price: alert.reference_price,
            idempotency_key: key,
        };
        Ok(self.executor.execute(&trade).await?)
    }
}
