//! Instrument catalog and symbol mapping configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path to the scrip-master CSV dataset.
    #[serde(default = "default_dataset_path")]
    pub dataset_path: String,
    /// Underlyings whose derivative series expire weekly; everything else
    /// follows the monthly rule.
    #[serde(default = "default_weekly_underlyings")]
    pub weekly_underlyings: Vec<String>,
    /// Extra symbol aliases layered over the built-in table.
    #[serde(default)]
    pub symbol_aliases: HashMap<String, String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            weekly_underlyings: default_weekly_underlyings(),
            symbol_aliases: HashMap::new(),
        }
    }
}

pub(crate) fn default_dataset_path() -> String {
    "scrip-master.csv".to_string()
}

pub(crate) fn default_weekly_underlyings() -> Vec<String> {
    vec!["NIFTY".to_string(), "SENSEX".to_string()]
}
