//! S1 -- Primary Trend.
//!
//! Long-term trend from the 50-day and 250-day SMA. A 0.5% hysteresis band
//! that must hold for two consecutive sessions prevents whipsaw at the
//! crossover.

use crate::indicators::{last, last_back, sma};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S1PrimaryTrend;

const WEIGHT: f64 = 0.25;
const HYSTERESIS: f64 = 0.005;
const CONFIRM_SESSIONS: usize = 2;

impl SubStrategy for S1PrimaryTrend {
    fn name(&self) -> &'static str {
        "S1_PrimaryTrend"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let sma50 = sma(closes, 50);
        let sma250 = sma(closes, 250);

        let confirmed_bull = (0..CONFIRM_SESSIONS).all(|back| {
            match (
                last_back(closes, back),
                last_back(&sma50, back),
                last_back(&sma250, back),
            ) {
                (Some(c), Some(fast), Some(slow)) => {
                    c >= fast * (1.0 + HYSTERESIS) && fast > slow
                }
                _ => false,
            }
        });
        let confirmed_bear = (0..CONFIRM_SESSIONS).all(|back| {
            match (
                last_back(closes, back),
                last_back(&sma50, back),
                last_back(&sma250, back),
            ) {
                (Some(c), Some(fast), Some(slow)) => {
                    c <= fast * (1.0 - HYSTERESIS) && fast < slow
                }
                _ => false,
            }
        });

        let (raw_score, strength) = if confirmed_bull {
            (1.0, SignalStrength::StrongBull)
        } else if confirmed_bear {
            (-0.5, SignalStrength::StrongBear)
        } else {
            (0.0, SignalStrength::Neutral)
        };

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("sma50", last(&sma50).unwrap_or(f64::NAN))
            .with_diagnostic("sma250", last(&sma250).unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::testdata;

    #[test]
    fn uptrend_is_strong_bull() {
        let closes = testdata::uptrend(300);
        let sig = S1PrimaryTrend.evaluate(&closes);
        assert_eq!(sig.strength, SignalStrength::StrongBull);
        assert_eq!(sig.raw_score, 1.0);
    }

    #[test]
    fn downtrend_is_strong_bear() {
        let closes = testdata::downtrend(400);
        let sig = S1PrimaryTrend.evaluate(&closes);
        assert_eq!(sig.strength, SignalStrength::StrongBear);
        assert_eq!(sig.raw_score, -0.5);
    }

    #[test]
    fn single_contrary_session_breaks_confirmation() {
        let mut closes = testdata::uptrend(300);
        // Knock the final close back inside the hysteresis band.
        let n = closes.len();
        closes[n - 1] = closes[n - 2] * 0.93;
        let sig = S1PrimaryTrend.evaluate(&closes);
        assert_eq!(sig.strength, SignalStrength::Neutral);
        assert_eq!(sig.raw_score, 0.0);
    }

    #[test]
    fn inside_hysteresis_band_is_neutral() {
        // Closes pinned exactly on the SMA cannot clear the 0.5% band.
        let closes = vec![100.0; 300];
        let sig = S1PrimaryTrend.evaluate(&closes);
        assert_eq!(sig.strength, SignalStrength::Neutral);
    }
}
