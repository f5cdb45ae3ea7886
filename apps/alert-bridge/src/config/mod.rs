//! Configuration loading, validation, and environment interpolation.
//!
//! Configuration is a single YAML file. `${VAR}` and `${VAR:-default}`
//! references are interpolated from the environment before parsing, so
//! secrets stay out of the file itself.

mod broker;
mod catalog;
mod notify;
mod server;
mod state;
mod trading;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use broker::BrokerConfig;
pub use catalog::CatalogConfig;
pub use notify::{NotifyConfig, TelegramConfig};
pub use server::ServerConfig;
pub use state::StateConfig;
pub use trading::TradingConfig;

use crate::risk::RiskLimits;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse the YAML.
    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    /// A configured value is out of range or inconsistent.
    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Instrument catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Risk ceilings.
    #[serde(default)]
    pub risk: RiskLimits,
    /// Durable state settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Expiry-calendar settings.
    #[serde(default)]
    pub trading: TradingConfig,
    /// Notification settings.
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Load configuration from a YAML file with environment interpolation.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read, parsed, or
/// validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_string(),
        source: e,
    })?;
    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a [`ConfigError`] when the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // regex is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    let mut result = input.to_string();
    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_match.as_str()) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };
        result = result.replace(full_match.as_str(), &value);
    }
    result
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.webhook_secret.is_empty() {
        return Err(ConfigError::Validation(
            "server.webhook_secret must be set".to_string(),
        ));
    }

    if config.broker.retry.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "broker.retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.risk.capital <= rust_decimal::Decimal::ZERO {
        return Err(ConfigError::Validation(
            "risk.capital must be positive".to_string(),
        ));
    }

    if config.risk.max_lots_per_instrument <= 0 {
        return Err(ConfigError::Validation(
            "risk.max_lots_per_instrument must be positive".to_string(),
        ));
    }

    if config.risk.max_open_positions == 0 {
        return Err(ConfigError::Validation(
            "risk.max_open_positions must be positive".to_string(),
        ));
    }

    if config.state.processed_retention_days <= 0 {
        return Err(ConfigError::Validation(
            "state.processed_retention_days must be positive".to_string(),
        ));
    }

    if config.trading.cutoff_time().is_none() {
        return Err(ConfigError::Validation(format!(
            "trading.expiry_cutoff '{}' is not HH:MM",
            config.trading.expiry_cutoff
        )));
    }

    Ok(())
}
