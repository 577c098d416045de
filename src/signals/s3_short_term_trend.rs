//! S3 -- Short-Term Trend.
//!
//! 10-day vs 30-day SMA for near-term directional shifts.

use crate::indicators::{last, sma};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S3ShortTermTrend;

const WEIGHT: f64 = 0.10;

impl SubStrategy for S3ShortTermTrend {
    fn name(&self) -> &'static str {
        "S3_ShortTermTrend"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let sma10 = last(&sma(closes, 10));
        let sma30 = last(&sma(closes, 30));
        let close = last(closes);

        let (raw_score, strength) = match (close, sma10, sma30) {
            (Some(c), Some(fast), Some(slow)) => {
                let above_fast = c > fast;
                let fast_above_slow = fast > slow;
                match (above_fast, fast_above_slow) {
                    (true, true) => (1.0, SignalStrength::StrongBull),
                    (true, false) => (0.5, SignalStrength::Bull),
                    (false, false) => (-0.3, SignalStrength::Bear),
                    (false, true) => (0.0, SignalStrength::Neutral),
                }
            }
            _ => (0.0, SignalStrength::Neutral),
        };

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("sma10", sma10.unwrap_or(f64::NAN))
            .with_diagnostic("sma30", sma30.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::testdata;

    #[test]
    fn aligned_uptrend_is_strong_bull() {
        let sig = S3ShortTermTrend.evaluate(&testdata::uptrend(100));
        assert_eq!(sig.raw_score, 1.0);
    }

    #[test]
    fn aligned_downtrend_is_bear() {
        let sig = S3ShortTermTrend.evaluate(&testdata::downtrend(100));
        assert_eq!(sig.raw_score, -0.3);
        assert_eq!(sig.strength, SignalStrength::Bear);
    }

    #[test]
    fn early_bounce_is_bull() {
        // Downtrend with a pop that lifts the close above the 10-day SMA
        // while the 10-day remains below the 30-day.
        let mut closes = testdata::downtrend(100);
        let n = closes.len();
        closes[n - 1] *= 1.05;
        let sig = S3ShortTermTrend.evaluate(&closes);
        assert_eq!(sig.raw_score, 0.5);
        assert_eq!(sig.strength, SignalStrength::Bull);
    }

    #[test]
    fn pullback_in_uptrend_is_neutral() {
        let mut closes = testdata::uptrend(100);
        let n = closes.len();
        closes[n - 1] *= 0.97;
        let sig = S3ShortTermTrend.evaluate(&closes);
        assert_eq!(sig.raw_score, 0.0);
        assert_eq!(sig.strength, SignalStrength::Neutral);
    }
}
