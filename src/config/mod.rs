//! Configuration for the White Light engine.
//!
//! Typed sections loaded from an optional config file overlaid with
//! `WL`-prefixed environment variables. Unknown keys are a load error;
//! out-of-range values fail `validate()` before any network I/O.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Market data and cache settings
    #[serde(default)]
    pub data: DataConfig,
    /// Allocation rule parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Order execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Brokerage selection
    #[serde(default)]
    pub brokers: BrokersConfig,
    /// Alert transport selection
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Directory for the per-symbol bar cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Symbols kept in sync (reference index first)
    #[serde(default = "default_tickers")]
    pub tickers: Vec<String>,
    /// First date fetched when a cache file is empty
    #[serde(default = "default_history_start")]
    pub history_start: chrono::NaiveDate,
    /// Market-data providers in priority order
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    /// Annualized portfolio volatility target
    #[serde(default = "default_target_vol")]
    pub target_vol: f64,
    /// Realized-vol floor for the SQQQ crash sprint
    #[serde(default = "default_sprint_vol_threshold")]
    pub sprint_vol_threshold: f64,
    /// Sprint window: sessions below the 200-day SMA
    #[serde(default = "default_sprint_max_days")]
    pub sprint_max_days: u32,
    /// SQQQ weight while the sprint is active
    #[serde(default = "default_sprint_sqqq_pct")]
    pub sprint_sqqq_pct: Decimal,
    /// Minimum per-symbol weight change that triggers an order
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Orders below this notional are dropped
    #[serde(default = "default_min_order_notional")]
    pub min_order_notional: Decimal,
    /// Cash fraction held back when sizing buys
    #[serde(default = "default_safety_margin")]
    pub safety_margin: Decimal,
    /// Base delay for the retry backoff, seconds
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: f64,
    /// Backoff cap, seconds
    #[serde(default = "default_retry_cap_secs")]
    pub retry_cap_secs: f64,
    /// Maximum submission attempts per order
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Order status poll interval, seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Stop issuing orders this close to the bell, seconds
    #[serde(default = "default_market_close_buffer_secs")]
    pub market_close_buffer_secs: i64,
    /// Execution window opens this many minutes before the close
    #[serde(default = "default_window_start_minutes")]
    pub window_start_minutes_before_close: i64,
    /// Execution window shuts this many minutes before the close
    #[serde(default = "default_window_end_minutes")]
    pub window_end_minutes_before_close: i64,
    /// Eastern-time-to-UTC offset in hours (5 standard, 4 daylight)
    #[serde(default = "default_et_utc_offset_hours")]
    pub et_utc_offset_hours: i64,
    /// Plan and report without submitting orders
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokersConfig {
    /// Primary brokerage: "alpaca" or "paper"
    #[serde(default = "default_broker_primary")]
    pub primary: String,
    /// Optional failover brokerage
    #[serde(default)]
    pub secondary: Option<String>,
    /// Use the paper-trading endpoint for Alpaca
    #[serde(default = "default_true")]
    pub alpaca_paper: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    /// "telegram", "ntfy", or "noop"
    #[serde(default = "default_alert_provider")]
    pub provider: String,
    /// ntfy topic, when the ntfy provider is selected
    #[serde(default)]
    pub ntfy_topic: Option<String>,
}

// Default value functions

fn default_cache_dir() -> String {
    "./data".to_string()
}

fn default_tickers() -> Vec<String> {
    vec![
        "NDX".to_string(),
        "TQQQ".to_string(),
        "SQQQ".to_string(),
        "BIL".to_string(),
    ]
}

fn default_history_start() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2011, 1, 1).unwrap()
}

fn default_providers() -> Vec<String> {
    vec!["polygon".to_string(), "stooq".to_string()]
}

fn default_target_vol() -> f64 {
    0.20
}

fn default_sprint_vol_threshold() -> f64 {
    0.25
}

fn default_sprint_max_days() -> u32 {
    15
}

fn default_sprint_sqqq_pct() -> Decimal {
    dec!(0.30)
}

fn default_rebalance_threshold() -> Decimal {
    dec!(0.05)
}

fn default_min_order_notional() -> Decimal {
    dec!(10)
}

fn default_safety_margin() -> Decimal {
    dec!(0.01)
}

fn default_retry_base_secs() -> f64 {
    2.0
}

fn default_retry_cap_secs() -> f64 {
    60.0
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_market_close_buffer_secs() -> i64 {
    60
}

fn default_window_start_minutes() -> i64 {
    15
}

fn default_window_end_minutes() -> i64 {
    1
}

fn default_et_utc_offset_hours() -> i64 {
    5
}

fn default_broker_primary() -> String {
    "alpaca".to_string()
}

fn default_alert_provider() -> String {
    "noop".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from `whitelight.toml` (optional) and
    /// `WL`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("whitelight").required(false))
            .add_source(config::Environment::default().separator("__").prefix("WL"))
            .build()
            .context("failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.target_vol > 0.0 && self.strategy.target_vol < 1.0,
            "target_vol must be in (0, 1)"
        );
        anyhow::ensure!(
            self.strategy.sprint_vol_threshold > 0.0,
            "sprint_vol_threshold must be positive"
        );
        anyhow::ensure!(
            self.strategy.sprint_sqqq_pct > Decimal::ZERO
                && self.strategy.sprint_sqqq_pct <= Decimal::ONE,
            "sprint_sqqq_pct must be in (0, 1]"
        );
        anyhow::ensure!(
            self.strategy.rebalance_threshold >= Decimal::ZERO
                && self.strategy.rebalance_threshold < Decimal::ONE,
            "rebalance_threshold must be in [0, 1)"
        );
        anyhow::ensure!(
            self.execution.safety_margin >= Decimal::ZERO
                && self.execution.safety_margin < Decimal::ONE,
            "safety_margin must be in [0, 1)"
        );
        anyhow::ensure!(
            self.execution.retry_max_attempts >= 1,
            "retry_max_attempts must be at least 1"
        );
        anyhow::ensure!(!self.data.tickers.is_empty(), "tickers must not be empty");
        for broker in std::iter::once(&self.brokers.primary).chain(self.brokers.secondary.iter())
        {
            anyhow::ensure!(
                matches!(broker.as_str(), "alpaca" | "paper"),
                "unknown brokerage '{broker}'"
            );
        }
        Ok(())
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            tickers: default_tickers(),
            history_start: default_history_start(),
            providers: default_providers(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            target_vol: default_target_vol(),
            sprint_vol_threshold: default_sprint_vol_threshold(),
            sprint_max_days: default_sprint_max_days(),
            sprint_sqqq_pct: default_sprint_sqqq_pct(),
            rebalance_threshold: default_rebalance_threshold(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_order_notional: default_min_order_notional(),
            safety_margin: default_safety_margin(),
            retry_base_secs: default_retry_base_secs(),
            retry_cap_secs: default_retry_cap_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
            market_close_buffer_secs: default_market_close_buffer_secs(),
            window_start_minutes_before_close: default_window_start_minutes(),
            window_end_minutes_before_close: default_window_end_minutes(),
            et_utc_offset_hours: default_et_utc_offset_hours(),
            dry_run: false,
        }
    }
}

impl Default for BrokersConfig {
    fn default() -> Self {
        Self {
            primary: default_broker_primary(),
            secondary: None,
            alpaca_paper: default_true(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            provider: default_alert_provider(),
            ntfy_topic: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn bad_target_vol_is_rejected() {
        let mut config = Config::default();
        config.strategy.target_vol = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_broker_is_rejected() {
        let mut config = Config::default();
        config.brokers.secondary = Some("robinhood".to_string());
        assert!(config.validate().is_err());
    }

    fn parse_toml(raw: &str) -> std::result::Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn unknown_keys_fail_deserialization() {
        let raw = "[strategy]\ntarget_vol = 0.2\nmystery_knob = 1\n";
        assert!(parse_toml(raw).is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let raw = "[strategy]\ntarget_vol = 0.15\n\n[execution]\ndry_run = true\n";
        let config = parse_toml(raw).unwrap();
        assert_eq!(config.strategy.target_vol, 0.15);
        assert!(config.execution.dry_run);
        assert_eq!(config.strategy.sprint_max_days, 15);
    }

    #[test]
    fn spec_defaults_match() {
        let config = Config::default();
        assert_eq!(config.strategy.target_vol, 0.20);
        assert_eq!(config.strategy.sprint_vol_threshold, 0.25);
        assert_eq!(config.strategy.sprint_max_days, 15);
        assert_eq!(config.strategy.rebalance_threshold, dec!(0.05));
        assert_eq!(config.execution.min_order_notional, dec!(10));
        assert_eq!(config.execution.retry_max_attempts, 5);
        assert_eq!(config.execution.market_close_buffer_secs, 60);
    }
}
