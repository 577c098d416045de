//! S7 -- Volatility Regime.
//!
//! Ratio of 20-day to 60-day realized volatility classifies the regime,
//! filtered by the 100-day SMA trend. An extreme ratio overrides the trend.

use crate::indicators::{last, realized_volatility, sma};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S7VolatilityRegime;

const WEIGHT: f64 = 0.10;

impl SubStrategy for S7VolatilityRegime {
    fn name(&self) -> &'static str {
        "S7_VolatilityRegime"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let vol20 = last(&realized_volatility(closes, 20));
        let vol60 = last(&realized_volatility(closes, 60));
        let sma100 = last(&sma(closes, 100));
        let close = last(closes);

        let (raw_score, strength) = match (close, sma100, vol20, vol60) {
            (Some(c), Some(ma), Some(v20), Some(v60)) => {
                let ratio = if v60 == 0.0 { 1.0 } else { v20 / v60 };
                let bullish = c > ma;
                if ratio > 2.0 {
                    // Vol expansion override regardless of trend.
                    (-0.3, SignalStrength::Bear)
                } else if ratio > 1.5 && !bullish {
                    (-0.5, SignalStrength::Bear)
                } else if ratio > 1.5 {
                    (0.0, SignalStrength::Neutral)
                } else if ratio < 0.8 && bullish {
                    (1.0, SignalStrength::StrongBull)
                } else if ratio < 0.8 {
                    (-0.2, SignalStrength::Bear)
                } else if (0.8..=1.2).contains(&ratio) && bullish {
                    (0.5, SignalStrength::Bull)
                } else {
                    (0.0, SignalStrength::Neutral)
                }
            }
            _ => (0.0, SignalStrength::Neutral),
        };

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("vol20", vol20.unwrap_or(f64::NAN))
            .with_diagnostic("vol60", vol60.unwrap_or(f64::NAN))
            .with_diagnostic("sma100", sma100.unwrap_or(f64::NAN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calming_vol_in_uptrend_is_strong_bull() {
        // Noisy history that goes quiet and keeps drifting up: vol20 well
        // below vol60, close above the 100-day SMA.
        let mut closes = Vec::with_capacity(200);
        let mut level: f64 = 1000.0;
        for i in 0..200 {
            level *= if i < 170 {
                if i % 2 == 0 { 1.02 } else { 0.985 }
            } else {
                1.0015
            };
            closes.push(level);
        }
        let sig = S7VolatilityRegime.evaluate(&closes);
        assert_eq!(sig.raw_score, 1.0);
        assert_eq!(sig.strength, SignalStrength::StrongBull);
    }

    #[test]
    fn vol_expansion_in_downtrend_is_bearish() {
        // Quiet climb that turns into a violent slide: the 20-day vol runs
        // well ahead of the 60-day and the close loses the 100-day SMA.
        let mut closes = Vec::with_capacity(200);
        let mut level: f64 = 1000.0;
        for i in 0..200 {
            level *= if i < 178 {
                1.0015
            } else if i % 2 == 0 {
                0.965
            } else {
                1.02
            };
            closes.push(level);
        }
        let sig = S7VolatilityRegime.evaluate(&closes);
        assert_eq!(sig.raw_score, -0.5);
        assert_eq!(sig.strength, SignalStrength::Bear);
    }

    #[test]
    fn steady_uptrend_is_mildly_bullish() {
        // Constant log-return: vol20 == vol60 == 0, ratio defaults to 1.0.
        let closes: Vec<f64> = (0..200).map(|i| 1000.0 * 1.001f64.powi(i)).collect();
        let sig = S7VolatilityRegime.evaluate(&closes);
        assert_eq!(sig.raw_score, 0.5);
        assert_eq!(sig.strength, SignalStrength::Bull);
    }

    #[test]
    fn short_history_is_neutral() {
        let closes: Vec<f64> = (0..50).map(|i| 1000.0 + i as f64).collect();
        let sig = S7VolatilityRegime.evaluate(&closes);
        assert_eq!(sig.strength, SignalStrength::Neutral);
    }
}
