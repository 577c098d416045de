//! Sub-strategy signal layer.
//!
//! Each sub-strategy maps the NDX close history to a bounded [`Signal`].
//! Signals are pure functions of the history tail: no persisted state, and
//! equal inputs yield equal outputs.

mod s1_primary_trend;
mod s2_intermediate_trend;
mod s3_short_term_trend;
mod s4_trend_strength;
mod s5_momentum_velocity;
mod s6_mean_rev_bollinger;
mod s7_volatility_regime;

pub use s1_primary_trend::S1PrimaryTrend;
pub use s2_intermediate_trend::S2IntermediateTrend;
pub use s3_short_term_trend::S3ShortTermTrend;
pub use s4_trend_strength::S4TrendStrength;
pub use s5_momentum_velocity::S5MomentumVelocity;
pub use s6_mean_rev_bollinger::S6MeanRevBollinger;
pub use s7_volatility_regime::S7VolatilityRegime;

use serde::Serialize;
use std::fmt;

/// Discrete signal levels emitted by each sub-strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    StrongBear,
    Bear,
    Neutral,
    Bull,
    StrongBull,
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StrongBear => "STRONG_BEAR",
            Self::Bear => "BEAR",
            Self::Neutral => "NEUTRAL",
            Self::Bull => "BULL",
            Self::StrongBull => "STRONG_BULL",
        };
        write!(f, "{s}")
    }
}

/// Output of a single sub-strategy at the final session of a history.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub strategy: &'static str,
    pub strength: SignalStrength,
    /// Ensemble weight; fixed per strategy, summing to 1.0 across S1-S7.
    pub weight: f64,
    /// Continuous score in [-1.0, +1.0].
    pub raw_score: f64,
    /// Named diagnostic values for telemetry (the indicator readings the
    /// decision was made on).
    pub diagnostics: Vec<(&'static str, f64)>,
}

impl Signal {
    pub fn new(
        strategy: &'static str,
        strength: SignalStrength,
        weight: f64,
        raw_score: f64,
    ) -> Self {
        Self {
            strategy,
            strength,
            weight,
            raw_score,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostic(mut self, key: &'static str, value: f64) -> Self {
        self.diagnostics.push((key, value));
        self
    }
}

/// A single sub-strategy examining one facet of market structure.
pub trait SubStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ensemble weight (the seven defaults sum to 1.0).
    fn weight(&self) -> f64;

    /// Evaluate on the close history up to and including the decision
    /// session. The caller guarantees the warm-up requirement.
    fn evaluate(&self, closes: &[f64]) -> Signal;
}

/// The full enumerated ensemble in evaluation order.
pub fn all_strategies() -> Vec<Box<dyn SubStrategy>> {
    vec![
        Box::new(S1PrimaryTrend),
        Box::new(S2IntermediateTrend),
        Box::new(S3ShortTermTrend),
        Box::new(S4TrendStrength),
        Box::new(S5MomentumVelocity),
        Box::new(S6MeanRevBollinger),
        Box::new(S7VolatilityRegime),
    ]
}

#[cfg(test)]
pub(crate) mod testdata {
    /// A steady uptrend long enough for every lookback (260+ sessions).
    pub fn uptrend(len: usize) -> Vec<f64> {
        (0..len).map(|i| 1000.0 * 1.001f64.powi(i as i32)).collect()
    }

    /// A steady downtrend.
    pub fn downtrend(len: usize) -> Vec<f64> {
        (0..len).map(|i| 5000.0 * 0.999f64.powi(i as i32)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = all_strategies().iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {total}");
    }

    #[test]
    fn ensemble_has_seven_members() {
        assert_eq!(all_strategies().len(), 7);
    }

    #[test]
    fn scores_are_bounded() {
        let up = testdata::uptrend(300);
        let down = testdata::downtrend(300);
        for strat in all_strategies() {
            for history in [&up, &down] {
                let sig = strat.evaluate(history);
                assert!(
                    (-1.0..=1.0).contains(&sig.raw_score),
                    "{} emitted {}",
                    strat.name(),
                    sig.raw_score
                );
            }
        }
    }

    #[test]
    fn signals_are_shift_invariant() {
        // Evaluating at t on a truncated history must match evaluating the
        // same t inside a longer one.
        let full = testdata::uptrend(320);
        for strat in all_strategies() {
            let on_full_prefix = strat.evaluate(&full[..300]);
            let truncated: Vec<f64> = full[..300].to_vec();
            let on_truncated = strat.evaluate(&truncated);
            assert_eq!(on_full_prefix.raw_score, on_truncated.raw_score);
            assert_eq!(on_full_prefix.strength, on_truncated.strength);
        }
    }

    #[test]
    fn equal_inputs_yield_equal_outputs() {
        let history = testdata::uptrend(300);
        for strat in all_strategies() {
            let a = strat.evaluate(&history);
            let b = strat.evaluate(&history);
            assert_eq!(a.raw_score, b.raw_score);
            assert_eq!(a.strength, b.strength);
        }
    }
}
