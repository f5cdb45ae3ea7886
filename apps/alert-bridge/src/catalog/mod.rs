//! Instrument catalog: read-mostly index over the scrip-master dataset.
//!
//! Refresh parses the whole dataset into a fresh index and swaps it in
//! atomically; concurrent lookups keep reading the previous index and never
//! observe a partially-built one. A failed refresh leaves the last-known-good
//! index active and marks the catalog stale instead of raising fatally.

mod dataset;

pub use dataset::{ScripRow, parse_expiry};

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{ExpiryRule, Instrument, InstrumentClass, OptionType};

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No instrument matches the requested key.
    #[error("instrument not found: {symbol}:{class}")]
    NotFound {
        /// Canonical symbol looked up.
        symbol: String,
        /// Instrument class looked up.
        class: InstrumentClass,
    },

    /// The reference dataset could not be read or parsed. The previous
    /// index stays active.
    #[error("catalog refresh failed, previous index kept: {0}")]
    Stale(String),
}

/// Immutable index built from one dataset refresh.
#[derive(Debug, Default)]
struct CatalogIndex {
    /// Instruments keyed by (canonical symbol, class), sorted by expiry.
    by_series: HashMap<(String, InstrumentClass), Vec<Instrument>>,
    /// Total instrument count, for logs and the refresh response.
    len: usize,
}

impl CatalogIndex {
    fn build(rows: impl Iterator<Item = ScripRow>, weekly: &HashSet<String>) -> Self {
        let mut by_series: HashMap<(String, InstrumentClass), Vec<Instrument>> = HashMap::new();
        let mut len = 0usize;

        for row in rows {
            let symbol = row.underlying_symbol.trim().to_uppercase();
            let rule = if weekly.contains(&symbol) {
                ExpiryRule::WeeklyThursday
            } else {
                ExpiryRule::MonthlyLastThursday
            };
            if let Some(instrument) = row.into_instrument(rule) {
                len += 1;
                by_series
                    .entry((instrument.canonical_symbol.clone(), instrument.class))
                    .or_default()
                    .push(instrument);
            }
        }

        for series in by_series.values_mut() {
            series.sort_by_key(|i| (i.expiry, i.strike));
        }

        Self { by_series, len }
    }
}

/// Thread-safe instrument catalog with atomic refresh.
#[derive(Debug)]
pub struct InstrumentCatalog {
    index: RwLock<Arc<CatalogIndex>>,
    stale: AtomicBool,
    weekly: HashSet<String>,
}

impl InstrumentCatalog {
    /// Create an empty catalog. `weekly_underlyings` selects which series
    /// follow the weekly-Thursday expiry rule; all others are monthly.
    #[must_use]
    pub fn new(weekly_underlyings: &[String]) -> Self {
        Self {
            index: RwLock::new(Arc::new(CatalogIndex::default())),
            stale: AtomicBool::new(false),
            weekly: weekly_underlyings
                .iter()
                .map(|s| s.trim().to_uppercase())
                .collect(),
        }
    }

    /// Whether the last refresh attempt failed.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    /// Number of instruments in the active index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len
    }

    /// True when no dataset has been loaded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<CatalogIndex> {
        match self.index.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Refresh the catalog from a CSV file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Stale`] when the file cannot be read or
    /// parsed; the previous index remains active.
    pub fn refresh_from_path(&self, path: &Path) -> Result<usize, CatalogError> {
        let file = std::fs::File::open(path).map_err(|e| {
            self.stale.store(true, Ordering::Relaxed);
            warn!(path = %path.display(), error = %e, "Catalog dataset unreadable");
            CatalogError::Stale(format!("open {}: {e}", path.display()))
        })?;
        self.refresh_from_reader(file)
    }

    /// Refresh the catalog from any CSV reader.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Stale`] when the CSV is structurally invalid
    /// or yields zero usable instruments; the previous index remains active.
    pub fn refresh_from_reader<R: Read>(&self, reader: R) -> Result<usize, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for result in csv_reader.deserialize::<ScripRow>() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "Skipping unparseable scrip row");
                }
            }
        }

        if rows.is_empty() {
            self.stale.store(true, Ordering::Relaxed);
            return Err(CatalogError::Stale(format!(
                "no usable rows in dataset ({skipped} skipped)"
            )));
        }

        let next = Arc::new(CatalogIndex::build(rows.into_iter(), &self.weekly));
        if next.len == 0 {
            self.stale.store(true, Ordering::Relaxed);
            return Err(CatalogError::Stale(
                "dataset produced no tradable instruments".to_string(),
            ));
        }

        let count = next.len;
        match self.index.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        self.stale.store(false, Ordering::Relaxed);
        info!(instruments = count, skipped_rows = skipped, "Catalog refreshed");
        Ok(count)
    }

    /// Look up the contract for (symbol, class) at a specific expiry.
    ///
    /// Equities ignore `expiry`. For options, `strike` and `option_type`
    /// narrow the match.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] when nothing matches.
    pub fn lookup(
        &self,
        symbol: &str,
        class: InstrumentClass,
        expiry: Option<NaiveDate>,
        strike: Option<Decimal>,
        option_type: Option<OptionType>,
    ) -> Result<Instrument, CatalogError> {
        let index = self.snapshot();
        let series = index
            .by_series
            .get(&(symbol.to_string(), class))
            .ok_or_else(|| CatalogError::NotFound {
                symbol: symbol.to_string(),
                class,
            })?;

        series
            .iter()
            .find(|i| {
                (class == InstrumentClass::Equity || expiry.is_none() || i.expiry == expiry)
                    && (strike.is_none() || i.strike == strike)
                    && (option_type.is_none() || i.option_type == option_type)
            })
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                symbol: symbol.to_string(),
                class,
            })
    }

    /// Listed expiry series for (symbol, class), ascending and deduplicated.
    #[must_use]
    pub fn expiries(&self, symbol: &str, class: InstrumentClass) -> Vec<NaiveDate> {
        let index = self.snapshot();
        let mut expiries: Vec<NaiveDate> = index
            .by_series
            .get(&(symbol.to_string(), class))
            .map(|series| series.iter().filter_map(|i| i.expiry).collect())
            .unwrap_or_default();
        expiries.sort_unstable();
        expiries.dedup();
        expiries
    }

    /// Expiry rule for a canonical symbol.
    #[must_use]
    pub fn expiry_rule(&self, symbol: &str) -> ExpiryRule {
        if self.weekly.contains(symbol) {
            ExpiryRule::WeeklyThursday
        } else {
            ExpiryRule::MonthlyLastThursday
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = "\
SECURITY_ID,EXCH_ID,UNDERLYING_SYMBOL,INSTRUMENT_TYPE,LOT_SIZE,TICK_SIZE,SM_EXPIRY_DATE,STRIKE_PRICE,OPTION_TYPE
53001,NSE,NIFTY,FUTIDX,75,0.05,2024-12-26,,
53002,NSE,NIFTY,FUTIDX,75,0.05,2025-01-30,,
44001,NSE,NIFTY,OPTIDX,75,0.05,2024-12-26,24000,CE
44002,NSE,NIFTY,OPTIDX,75,0.05,2024-12-26,24000,PE
11536,NSE,TCS,EQUITY,1,0.05,,,
99001,MCX,CRUDEOIL,FUTCOM,100,1,26-Dec-2024,,
";

    fn loaded_catalog() -> InstrumentCatalog {
        let catalog = InstrumentCatalog::new(&["NIFTY".to_string()]);
        catalog
            .refresh_from_reader(DATASET.as_bytes())
            .expect("refresh");
        catalog
    }

    #[test]
    fn refresh_indexes_by_symbol_and_class() {
        let catalog = loaded_catalog();
        assert_eq!(catalog.len(), 6);
        assert!(!catalog.is_stale());

        let fut = catalog
            .lookup(
                "NIFTY",
                InstrumentClass::Future,
                NaiveDate::from_ymd_opt(2024, 12, 26),
                None,
                None,
            )
            .expect("future");
        assert_eq!(fut.security_id, "53001");
        assert_eq!(fut.lot_size, 75);
        assert_eq!(fut.expiry_rule, ExpiryRule::WeeklyThursday);
    }

    #[test]
    fn lookup_narrows_options_by_strike_and_type() {
        let catalog = loaded_catalog();
        let put = catalog
            .lookup(
                "NIFTY",
                InstrumentClass::Option,
                NaiveDate::from_ymd_opt(2024, 12, 26),
                Some(Decimal::from(24000)),
                Some(OptionType::Put),
            )
            .expect("put");
        assert_eq!(put.security_id, "44002");
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let catalog = loaded_catalog();
        let err = catalog
            .lookup("WIPRO", InstrumentClass::Future, None, None, None)
            .expect_err("missing");
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[test]
    fn expiries_are_sorted_and_deduplicated() {
        let catalog = loaded_catalog();
        let expiries = catalog.expiries("NIFTY", InstrumentClass::Future);
        assert_eq!(
            expiries,
            vec![
                NaiveDate::from_ymd_opt(2024, 12, 26).expect("date"),
                NaiveDate::from_ymd_opt(2025, 1, 30).expect("date"),
            ]
        );
    }

    #[test]
    fn failed_refresh_keeps_previous_index() {
        let catalog = loaded_catalog();
        let before = catalog.len();

        let err = catalog
            .refresh_from_reader(&b"not,a,scrip,master\n1,2,3,4\n"[..])
            .expect_err("bad dataset");
        assert!(matches!(err, CatalogError::Stale(_)));
        assert!(catalog.is_stale());

        // Last-known-good index still answers lookups.
        assert_eq!(catalog.len(), before);
        assert!(
            catalog
                .lookup("TCS", InstrumentClass::Equity, None, None, None)
                .is_ok()
        );

        // A good refresh clears the stale flag.
        catalog
            .refresh_from_reader(DATASET.as_bytes())
            .expect("refresh");
        assert!(!catalog.is_stale());
    }

    #[test]
    fn non_weekly_symbols_follow_monthly_rule() {
        let catalog = loaded_catalog();
        assert_eq!(
            catalog.expiry_rule("CRUDEOIL"),
            ExpiryRule::MonthlyLastThursday
        );
        assert_eq!(catalog.expiry_rule("NIFTY"), ExpiryRule::WeeklyThursday);
    }
}
