//! Market data: bar model, file-backed cache, providers, and sync.

pub mod cache;
pub mod calendar;
pub mod provider;
pub mod sync;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One daily OHLCV bar. Prices are fixed-precision; the close of bar `t`
/// is the only price used for decisions on session `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// An ordered, gap-checked sequence of daily bars for one symbol.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    symbol: String,
    bars: Vec<Bar>,
}

impl PriceHistory {
    /// Build a history from bars. Sorts by date and rejects duplicates.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Result<Self, EngineError> {
        bars.sort_by_key(|b| b.date);
        for pair in bars.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(EngineError::DataGap(format!(
                    "duplicate bar for {}",
                    pair[0].date
                )));
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn bar_on(&self, date: NaiveDate) -> Option<&Bar> {
        self.bars
            .binary_search_by_key(&date, |b| b.date)
            .ok()
            .map(|i| &self.bars[i])
    }

    /// Close on a given date, if a session exists for it.
    pub fn close_on(&self, date: NaiveDate) -> Option<Decimal> {
        self.bar_on(date).map(|b| b.close)
    }

    /// Sub-history containing every bar up to and including `date`.
    pub fn up_to(&self, date: NaiveDate) -> PriceHistory {
        let end = self.bars.partition_point(|b| b.date <= date);
        PriceHistory {
            symbol: self.symbol.clone(),
            bars: self.bars[..end].to_vec(),
        }
    }

    /// Closes as floats for the indicator layer. This is the single
    /// decimal-to-float boundary.
    pub fn closes_f64(&self) -> Vec<f64> {
        self.bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(f64::NAN))
            .collect()
    }

    /// Fail unless bar-to-bar calendar gaps stay within `max_gap_days`
    /// (long weekends and holiday clusters pass; gross gaps do not).
    pub fn check_gaps(&self, max_gap_days: i64) -> Result<(), EngineError> {
        for pair in self.bars.windows(2) {
            let gap = (pair[1].date - pair[0].date).num_days();
            if gap > max_gap_days {
                return Err(EngineError::DataGap(format!(
                    "{}: {} day gap between {} and {}",
                    self.symbol, gap, pair[0].date, pair[1].date
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testdata {
    use super::*;
    use chrono::Datelike;
    use rust_decimal::prelude::FromPrimitive;

    /// Bars on consecutive weekdays starting 2024-01-02 with the given
    /// closes.
    pub fn weekday_bars(closes: &[f64]) -> Vec<Bar> {
        let mut date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut bars = Vec::with_capacity(closes.len());
        for &close in closes {
            while matches!(
                date.weekday(),
                chrono::Weekday::Sat | chrono::Weekday::Sun
            ) {
                date = date.succ_opt().unwrap();
            }
            let px = Decimal::from_f64(close).unwrap().round_dp(8);
            bars.push(Bar {
                date,
                open: px,
                high: px,
                low: px,
                close: px,
                volume: 1_000_000,
            });
            date = date.succ_opt().unwrap();
        }
        bars
    }
}
