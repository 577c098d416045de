//! Per-session market context for the allocation rules.

use crate::indicators::{last, realized_volatility, sma};

/// Reference-index readings at the decision session. Everything here is
/// recomputed from bars each run; the engine keeps no hidden counters.
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub close: f64,
    pub sma_200: Option<f64>,
    pub realized_vol_20: Option<f64>,
    /// Consecutive sessions (including today) with `close <= sma_200`,
    /// 0 when today closed above it.
    pub days_below_sma200: u32,
}

impl MarketContext {
    /// Build from the close history up to and including the decision
    /// session.
    pub fn from_closes(closes: &[f64]) -> Self {
        let sma200 = sma(closes, 200);
        let vol20 = last(&realized_volatility(closes, 20));
        let close = closes.last().copied().unwrap_or(f64::NAN);

        let mut days_below = 0u32;
        for i in (0..closes.len()).rev() {
            let ma = sma200[i];
            if ma.is_nan() || closes[i] > ma {
                break;
            }
            days_below += 1;
        }

        Self {
            close,
            sma_200: last(&sma200),
            realized_vol_20: vol20,
            days_below_sma200: days_below,
        }
    }

    pub fn below_sma200(&self) -> bool {
        matches!(self.sma_200, Some(ma) if self.close < ma)
    }
}
