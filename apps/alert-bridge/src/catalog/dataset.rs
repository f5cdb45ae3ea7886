//! Scrip-master dataset parsing.
//!
//! The Dhan detailed scrip master is a wide CSV; we only read the columns
//! the pipeline needs. Expiry dates arrive in several formats depending on
//! segment, so parsing is tolerant.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{ExpiryRule, Instrument, InstrumentClass, OptionType};

/// Expiry date formats observed in the upstream file.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%d-%m-%Y"];

/// One row of the scrip master, named columns only.
#[derive(Debug, Deserialize)]
pub struct ScripRow {
    /// Broker security identifier.
    #[serde(rename = "SECURITY_ID")]
    pub security_id: String,
    /// Exchange identifier (NSE/BSE/MCX).
    #[serde(rename = "EXCH_ID")]
    pub exchange: String,
    /// Underlying symbol.
    #[serde(rename = "UNDERLYING_SYMBOL")]
    pub underlying_symbol: String,
    /// Instrument type code (FUTIDX, OPTSTK, EQUITY, ...).
    #[serde(rename = "INSTRUMENT_TYPE")]
    pub instrument_type: String,
    /// Lot size.
    #[serde(rename = "LOT_SIZE")]
    pub lot_size: Option<i64>,
    /// Tick size.
    #[serde(rename = "TICK_SIZE")]
    pub tick_size: Option<Decimal>,
    /// Contract expiry date, format varies.
    #[serde(rename = "SM_EXPIRY_DATE")]
    pub expiry: Option<String>,
    /// Strike price (options).
    #[serde(rename = "STRIKE_PRICE")]
    pub strike: Option<Decimal>,
    /// Option type (CE/PE), empty otherwise.
    #[serde(rename = "OPTION_TYPE")]
    pub option_type: Option<String>,
}

/// Parse an expiry date trying each known format in turn.
#[must_use]
pub fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

fn parse_class(instrument_type: &str) -> Option<InstrumentClass> {
    let t = instrument_type.trim().to_uppercase();
    if t.starts_with("FUT") {
        Some(InstrumentClass::Future)
    } else if t.starts_with("OPT") {
        Some(InstrumentClass::Option)
    } else if t == "EQUITY" || t == "ES" {
        Some(InstrumentClass::Equity)
    } else {
        None
    }
}

fn parse_option_type(raw: Option<&str>) -> Option<OptionType> {
    match raw.map(|s| s.trim().to_uppercase()).as_deref() {
        Some("CE" | "CALL") => Some(OptionType::Call),
        Some("PE" | "PUT") => Some(OptionType::Put),
        _ => None,
    }
}

fn segment_for(exchange: &str, class: InstrumentClass) -> String {
    match (exchange.trim().to_uppercase().as_str(), class) {
        ("MCX", _) => "MCX_COMM".to_string(),
        (ex, InstrumentClass::Equity) => format!("{ex}_EQ"),
        (ex, _) => format!("{ex}_FNO"),
    }
}

impl ScripRow {
    /// Convert a raw row into an [`Instrument`], or `None` when the row is
    /// for an instrument type we do not trade or is missing required fields.
    #[must_use]
    pub fn into_instrument(self, rule: ExpiryRule) -> Option<Instrument> {
        let class = parse_class(&self.instrument_type)?;
        let canonical_symbol = self.underlying_symbol.trim().to_uppercase();
        if canonical_symbol.is_empty() || self.security_id.trim().is_empty() {
            return None;
        }

        let expiry = self.expiry.as_deref().and_then(parse_expiry);
        if class != InstrumentClass::Equity && expiry.is_none() {
            // Derivative rows without a parseable expiry are unusable.
            return None;
        }

        Some(Instrument {
            security_id: self.security_id.trim().to_string(),
            exchange_segment: segment_for(&self.exchange, class),
            canonical_symbol,
            class,
            lot_size: self.lot_size.filter(|l| *l > 0).unwrap_or(1),
            tick_size: self.tick_size.unwrap_or(Decimal::new(5, 2)),
            expiry,
            strike: self.strike.filter(|s| !s.is_zero()),
            option_type: parse_option_type(self.option_type.as_deref()),
            expiry_rule: rule,
        })
    }
}
