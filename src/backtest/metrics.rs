//! Performance metrics over a backtest equity curve and trade list.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::TradeRecord;
use crate::indicators::TRADING_DAYS_PER_YEAR;

/// One month's portfolio return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub return_pct: f64,
}

/// Standard risk and trade statistics for a replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return: f64,
    /// Compound annual growth rate
    pub cagr: f64,
    /// Maximum peak-to-valley drawdown, as a positive fraction
    pub max_drawdown: f64,
    /// Annualized, risk-free rate 0
    pub sharpe_ratio: f64,
    /// Downside-deviation denominator
    pub sortino_ratio: f64,
    /// CAGR / |max drawdown|
    pub calmar_ratio: f64,
    /// Gross profits / gross losses
    pub profit_factor: f64,
    pub win_rate: f64,
    pub avg_trade_duration_days: f64,
    pub total_trades: usize,
    pub trading_days: usize,
}

impl BacktestMetrics {
    pub fn compute(equity_curve: &[(NaiveDate, Decimal)], trades: &[TradeRecord]) -> Self {
        let values: Vec<f64> = equity_curve
            .iter()
            .map(|(_, v)| v.to_f64().unwrap_or(0.0))
            .collect();
        let daily_returns = period_returns(&values);
        let completed: Vec<&TradeRecord> =
            trades.iter().filter(|t| t.pnl.is_some()).collect();

        let cagr = cagr(&values);
        let max_drawdown = max_drawdown(&values);

        Self {
            total_return: total_return(&values),
            cagr,
            max_drawdown,
            sharpe_ratio: sharpe(&daily_returns),
            sortino_ratio: sortino(&daily_returns),
            calmar_ratio: if max_drawdown > 0.0 {
                cagr / max_drawdown
            } else {
                0.0
            },
            profit_factor: profit_factor(&completed),
            win_rate: win_rate(&completed),
            avg_trade_duration_days: avg_duration(&completed),
            total_trades: completed.len(),
            trading_days: values.len(),
        }
    }

    /// Human-readable results block.
    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
  BACKTEST RESULTS ({} trading days)
═══════════════════════════════════════════════
  RETURNS
    Total Return:    {:+.2}%
    CAGR:            {:+.2}%

  RISK
    Max Drawdown:    {:.2}%
    Sharpe Ratio:    {:.3}
    Sortino Ratio:   {:.3}
    Calmar Ratio:    {:.3}

  TRADES
    Completed:       {}
    Win Rate:        {:.1}%
    Profit Factor:   {:.2}
    Avg Duration:    {:.1} days
═══════════════════════════════════════════════"#,
            self.trading_days,
            self.total_return * 100.0,
            self.cagr * 100.0,
            self.max_drawdown * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.calmar_ratio,
            self.total_trades,
            self.win_rate * 100.0,
            self.profit_factor,
            self.avg_trade_duration_days,
        )
    }
}

fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

fn total_return(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if first > 0.0 && values.len() > 1 => last / first - 1.0,
        _ => 0.0,
    }
}

fn cagr(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let first = values[0];
    let last = values[values.len() - 1];
    let n_days = (values.len() - 1) as f64;
    if first <= 0.0 || last <= 0.0 {
        return 0.0;
    }
    (last / first).powf(TRADING_DAYS_PER_YEAR / n_days) - 1.0
}

fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd: f64 = 0.0;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - v) / peak);
        }
    }
    max_dd
}

/// Annualized Sharpe with risk-free rate 0.
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = variance.sqrt();
    if sd == 0.0 {
        return 0.0;
    }
    mean / sd * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino: mean return over downside deviation.
fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_dev =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev == 0.0 {
        return 0.0;
    }
    mean / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

fn profit_factor(trades: &[&TradeRecord]) -> f64 {
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    for trade in trades {
        let pnl = trade
            .pnl
            .and_then(|p| p.to_f64())
            .unwrap_or(0.0);
        if pnl > 0.0 {
            gross_profit += pnl;
        } else {
            gross_loss -= pnl;
        }
    }
    if gross_loss == 0.0 {
        if gross_profit > 0.0 {
            return f64::INFINITY;
        }
        return 0.0;
    }
    gross_profit / gross_loss
}

fn win_rate(trades: &[&TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades
        .iter()
        .filter(|t| t.pnl.is_some_and(|p| p > Decimal::ZERO))
        .count();
    winners as f64 / trades.len() as f64
}

fn avg_duration(trades: &[&TradeRecord]) -> f64 {
    let durations: Vec<i64> = trades.iter().filter_map(|t| t.duration_days).collect();
    if durations.is_empty() {
        return 0.0;
    }
    durations.iter().sum::<i64>() as f64 / durations.len() as f64
}

/// Month-over-month returns from the daily equity curve.
pub fn monthly_returns(equity_curve: &[(NaiveDate, Decimal)]) -> Vec<MonthlyReturn> {
    if equity_curve.len() < 2 {
        return Vec::new();
    }

    // Last equity value of each month, in order.
    let mut month_ends: Vec<(i32, u32, f64)> = Vec::new();
    for (date, value) in equity_curve {
        let value = value.to_f64().unwrap_or(0.0);
        match month_ends.last_mut() {
            Some((y, m, v)) if *y == date.year() && *m == date.month() => *v = value,
            _ => month_ends.push((date.year(), date.month(), value)),
        }
    }

    month_ends
        .windows(2)
        .filter(|w| w[0].2 > 0.0)
        .map(|w| MonthlyReturn {
            year: w[1].0,
            month: w[1].1,
            return_pct: (w[1].2 / w[0].2 - 1.0) * 100.0,
        })
        .collect()
}
