//! S5 -- Momentum Velocity.
//!
//! 14-day rate of change smoothed with a 3-day SMA, with its first
//! difference splitting accelerating from decelerating momentum. A sharp
//! 5-day drawdown adds a bearish penalty.

use crate::indicators::{last, last_back, roc, sma};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S5MomentumVelocity;

const WEIGHT: f64 = 0.15;
const CRASH_ROC5: f64 = -0.05;
const CRASH_PENALTY: f64 = -0.2;

impl SubStrategy for S5MomentumVelocity {
    fn name(&self) -> &'static str {
        "S5_MomentumVelocity"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let smoothed = sma(&roc(closes, 14), 3);
        let momentum = last(&smoothed);
        let velocity = match (momentum, last_back(&smoothed, 1)) {
            (Some(now), Some(prev)) => Some(now - prev),
            _ => None,
        };

        let (mut raw_score, mut strength) = match (momentum, velocity) {
            (Some(m), Some(v)) => {
                if m > 0.0 && v > 0.0 {
                    (1.0, SignalStrength::StrongBull)
                } else if m > 0.0 {
                    (0.3, SignalStrength::Bull)
                } else if v > 0.0 {
                    (0.0, SignalStrength::Neutral)
                } else {
                    (-0.7, SignalStrength::Bear)
                }
            }
            _ => (0.0, SignalStrength::Neutral),
        };

        let roc5 = last(&roc(closes, 5));
        let mut crash = false;
        if let Some(r5) = roc5 {
            if r5 < CRASH_ROC5 {
                crash = true;
                raw_score = (raw_score + CRASH_PENALTY).max(-1.0);
                if raw_score <= -0.5 {
                    strength = SignalStrength::StrongBear;
                } else if raw_score < 0.0 {
                    strength = SignalStrength::Bear;
                }
            }
        }

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("smoothed_roc14", momentum.unwrap_or(f64::NAN))
            .with_diagnostic("velocity", velocity.unwrap_or(f64::NAN))
            .with_diagnostic("roc5", roc5.unwrap_or(f64::NAN))
            .with_diagnostic("crash_penalty", if crash { 1.0 } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exponential drift of `daily` percent per session.
    fn drift(len: usize, daily: f64) -> Vec<f64> {
        (0..len)
            .map(|i| 1000.0 * (1.0 + daily).powi(i as i32))
            .collect()
    }

    #[test]
    fn rising_and_accelerating_is_strong_bull() {
        // Momentum positive and still building.
        let mut closes = drift(60, 0.001);
        let n = closes.len();
        for (k, c) in closes[n - 5..].iter_mut().enumerate() {
            *c *= 1.0 + 0.004 * (k + 1) as f64;
        }
        let sig = S5MomentumVelocity.evaluate(&closes);
        assert_eq!(sig.raw_score, 1.0);
        assert_eq!(sig.strength, SignalStrength::StrongBull);
    }

    #[test]
    fn falling_and_decelerating_is_bear() {
        let mut closes = drift(60, -0.001);
        let n = closes.len();
        for (k, c) in closes[n - 5..].iter_mut().enumerate() {
            *c *= 1.0 - 0.004 * (k + 1) as f64;
        }
        let sig = S5MomentumVelocity.evaluate(&closes);
        assert_eq!(sig.raw_score, -0.7);
        assert_eq!(sig.strength, SignalStrength::Bear);
    }

    #[test]
    fn crash_penalty_applies_and_clamps() {
        // A drop of more than 5% over five sessions deepens the bear score
        // but never past -1.0.
        let mut closes = drift(60, -0.002);
        let n = closes.len();
        for c in closes[n - 5..].iter_mut() {
            *c *= 0.90;
        }
        let sig = S5MomentumVelocity.evaluate(&closes);
        assert_eq!(sig.raw_score, -0.9);
        assert_eq!(sig.strength, SignalStrength::StrongBear);
        assert!(sig.raw_score >= -1.0);
    }

    #[test]
    fn crash_penalty_downgrades_bullish_reading() {
        // Strong run-up, then a 5-day air pocket: momentum smoothing still
        // reads positive but the penalty trims the score.
        let mut closes = drift(60, 0.01);
        let n = closes.len();
        let peak = closes[n - 2];
        closes[n - 1] = peak * 0.90;
        let sig = S5MomentumVelocity.evaluate(&closes);
        let crash = sig
            .diagnostics
            .iter()
            .find(|(k, _)| *k == "crash_penalty")
            .map(|(_, v)| *v)
            .unwrap();
        assert_eq!(crash, 1.0);
        assert!(sig.raw_score <= 0.8);
    }

    #[test]
    fn insufficient_history_is_neutral() {
        let sig = S5MomentumVelocity.evaluate(&drift(10, 0.001));
        assert_eq!(sig.raw_score, 0.0);
        assert_eq!(sig.strength, SignalStrength::Neutral);
    }
}
