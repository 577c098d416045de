//! Deterministic backtest replay.
//!
//! Drives the same combiner and reconciler used live against historical
//! bars, day by day, filling orders at the session close. Given identical
//! bars and config, two runs produce identical output.

mod engine;
mod metrics;

pub use engine::{BacktestEngine, BacktestResult, DailyRecord, TradeRecord};
pub use metrics::{BacktestMetrics, MonthlyReturn};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Initial capital
    pub initial_capital: Decimal,
    /// Uniform per-side slippage in basis points (0 in the base model)
    pub slippage_bps: Decimal,
    /// Annualized BIL yield accrued daily when no BIL price series is
    /// loaded
    pub bil_apr: Decimal,
}

impl BacktestConfig {
    pub fn new(start: NaiveDate, end: NaiveDate, initial_capital: Decimal) -> Self {
        Self {
            start,
            end,
            initial_capital,
            slippage_bps: Decimal::ZERO,
            bil_apr: dec!(0.045),
        }
    }

    pub fn with_slippage_bps(mut self, bps: Decimal) -> Self {
        self.slippage_bps = bps;
        self
    }
}
