//! S2 -- Intermediate Trend.
//!
//! 20-day vs 100-day SMA alignment.

use crate::indicators::{last, sma};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S2IntermediateTrend;

const WEIGHT: f64 = 0.15;

impl SubStrategy for S2IntermediateTrend {
    fn name(&self) -> &'static str {
        "S2_IntermediateTrend"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let sma20 = last(&sma(closes, 20));
        let sma100 = last(&sma(closes, 100));
        let close = last(closes);

        let (raw_score, strength) = match (close, sma20, sma100) {
            (Some(c), Some(fast), Some(slow)) => {
                let above_fast = c > fast;
                let fast_above_slow = fast > slow;
                match (above_fast, fast_above_slow) {
                    (true, true) => (1.0, SignalStrength::StrongBull),
                    (false, false) => (-0.5, SignalStrength::Bear),
                    // Mixed alignment either way reads mildly bullish.
                    _ => (0.3, SignalStrength::Bull),
                }
            }
            _ => (0.0, SignalStrength::Neutral),
        };

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("sma20", sma20.unwrap_or(f64::NAN))
            .with_diagnostic("sma100", sma100.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::testdata;

    #[test]
    fn aligned_uptrend_is_strong_bull() {
        let sig = S2IntermediateTrend.evaluate(&testdata::uptrend(300));
        assert_eq!(sig.raw_score, 1.0);
        assert_eq!(sig.strength, SignalStrength::StrongBull);
    }

    #[test]
    fn aligned_downtrend_is_bear() {
        let sig = S2IntermediateTrend.evaluate(&testdata::downtrend(300));
        assert_eq!(sig.raw_score, -0.5);
        assert_eq!(sig.strength, SignalStrength::Bear);
    }

    #[test]
    fn mixed_alignment_is_mildly_bullish() {
        // Long downtrend with a sharp recent pop: close > SMA20 is still
        // false immediately, so build close > SMA20 with SMA20 < SMA100.
        let mut closes = testdata::downtrend(280);
        let n = closes.len();
        let base = closes[n - 1];
        for (i, c) in closes[n - 10..].iter_mut().enumerate() {
            *c = base * (1.0 + 0.01 * (i + 1) as f64);
        }
        let sig = S2IntermediateTrend.evaluate(&closes);
        assert_eq!(sig.raw_score, 0.3);
        assert_eq!(sig.strength, SignalStrength::Bull);
    }

    #[test]
    fn short_history_is_neutral() {
        let sig = S2IntermediateTrend.evaluate(&testdata::uptrend(50));
        assert_eq!(sig.raw_score, 0.0);
        assert_eq!(sig.strength, SignalStrength::Neutral);
    }
}
