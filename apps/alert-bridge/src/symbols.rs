//! Symbol normalization for heterogeneous alert spellings.
//!
//! TradingView sends symbols like `NSE:NIFTY1!`, `MCX:CRUDEOILM`, or dated
//! contract tickers like `NIFTY24DECFUT`; the catalog is keyed by canonical
//! underlying symbols (`NIFTY`, `CRUDEOIL`). Dated spellings also carry an
//! instrument-class and expiry-month hint, which the pipeline feeds into
//! expiry resolution.

use std::collections::HashMap;
use std::sync::OnceLock;

use thiserror::Error;

use crate::models::InstrumentClass;

/// Continuous-contract suffixes appended by TradingView.
const CONTINUOUS_SUFFIXES: &[&str] = &["1!", "2!", "3!"];

/// Built-in aliases for MCX mini contracts mapped to their main series.
const MCX_ALIASES: &[(&str, &str)] = &[
    ("CRUDEOILM", "CRUDEOIL"),
    ("GOLDM", "GOLD"),
    ("SILVERM", "SILVER"),
    ("COPPERM", "COPPER"),
];

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Terminal failure: the symbol maps to nothing we track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized symbol: {raw}")]
pub struct UnrecognizedSymbol {
    /// The raw symbol text as received.
    pub raw: String,
}

/// A normalized symbol plus hints recovered from its spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbol {
    /// Canonical underlying symbol.
    pub canonical: String,
    /// Instrument class implied by the spelling (`NIFTY24DECFUT` implies a
    /// future), if any.
    pub class: Option<InstrumentClass>,
    /// Expiry (year, month) implied by a dated spelling, if any.
    pub expiry_month: Option<(i32, u32)>,
}

/// Maps provider symbol spellings to canonical symbols.
#[derive(Debug, Clone)]
pub struct SymbolNormalizer {
    aliases: HashMap<String, String>,
}

impl Default for SymbolNormalizer {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl SymbolNormalizer {
    /// Build a normalizer from configured aliases layered over the built-in
    /// MCX table. Configured entries win on conflict.
    #[must_use]
    pub fn new(extra_aliases: &HashMap<String, String>) -> Self {
        let mut aliases: HashMap<String, String> = MCX_ALIASES
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        for (k, v) in extra_aliases {
            aliases.insert(k.trim().to_uppercase(), v.trim().to_uppercase());
        }
        Self { aliases }
    }

    /// Normalize a raw alert symbol.
    ///
    /// Uppercases and trims, strips one continuous-contract suffix and any
    /// exchange prefix, recognizes dated contract spellings, then applies
    /// the alias table.
    ///
    /// # Errors
    ///
    /// Returns [`UnrecognizedSymbol`] when the input is empty after
    /// canonicalization. Whether the result names a tracked instrument is
    /// decided later against the catalog.
    pub fn normalize(&self, raw: &str) -> Result<ParsedSymbol, UnrecognizedSymbol> {
        let mut s = raw.trim().to_uppercase();

        for suffix in CONTINUOUS_SUFFIXES {
            if let Some(stripped) = s.strip_suffix(suffix) {
                s = stripped.to_string();
                break;
            }
        }

        // "NSE:NIFTY" -> "NIFTY"
        if let Some((_, rest)) = s.split_once(':') {
            s = rest.to_string();
        }

        if s.is_empty() {
            return Err(UnrecognizedSymbol {
                raw: raw.to_string(),
            });
        }

        // "NIFTY24DECFUT" -> root NIFTY, December 2024, futures.
        let (root, class, expiry_month) = match dated_future_regex().captures(&s) {
            Some(caps) => {
                let root = caps["root"].to_string();
                let year = 2000 + caps["yy"].parse::<i32>().unwrap_or(0);
                let month = month_number(&caps["mon"]);
                (root, Some(InstrumentClass::Future), Some((year, month)))
            }
            None => (s, None, None),
        };

        let canonical = self.aliases.get(&root).cloned().unwrap_or(root);
        Ok(ParsedSymbol {
            canonical,
            class,
            expiry_month,
        })
    }
}

#[allow(clippy::expect_used)] // regex is a compile-time constant
fn dated_future_regex() -> &'static regex::Regex {
    static DATED_FUTURE: OnceLock<regex::Regex> = OnceLock::new();
    DATED_FUTURE.get_or_init(|| {
        regex::Regex::new(
            r"^(?P<root>[A-Z]+?)(?P<yy>\d{2})(?P<mon>JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)(?:FUT)$",
        )
        .expect("dated future regex is valid")
    })
}

fn month_number(name: &str) -> u32 {
    MONTHS
        .iter()
        .position(|m| *m == name)
        .map_or(0, |i| i as u32 + 1)
}
