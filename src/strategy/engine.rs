//! Strategy engine: runs every sub-strategy and the combiner.

use tracing::{info, warn};

use crate::error::EngineError;
use crate::signals::{all_strategies, Signal, SubStrategy};
use crate::strategy::{MarketContext, SignalCombiner, TargetAllocation};

/// Minimum NDX history before any signal is produced (250-day SMA plus
/// tolerance).
pub const WARMUP_BARS: usize = 260;

pub struct StrategyEngine {
    strategies: Vec<Box<dyn SubStrategy>>,
    combiner: SignalCombiner,
}

impl StrategyEngine {
    pub fn new(combiner: SignalCombiner) -> Self {
        Self::with_strategies(all_strategies(), combiner)
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn SubStrategy>>,
        combiner: SignalCombiner,
    ) -> Self {
        let total_weight: f64 = strategies.iter().map(|s| s.weight()).sum();
        if (total_weight - 1.0).abs() > 0.01 {
            warn!(total_weight, "sub-strategy weights do not sum to 1.0");
        }
        Self {
            strategies,
            combiner,
        }
    }

    /// Evaluate every sub-strategy on the NDX close history and combine
    /// into a target allocation.
    pub fn evaluate(
        &self,
        ndx_closes: &[f64],
        previous: &TargetAllocation,
    ) -> Result<(TargetAllocation, Vec<Signal>), EngineError> {
        if ndx_closes.len() < WARMUP_BARS {
            return Err(EngineError::DataGap(format!(
                "insufficient history: {} bars, need {WARMUP_BARS}",
                ndx_closes.len()
            )));
        }

        let mut signals = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let signal = strategy.evaluate(ndx_closes);
            info!(
                strategy = signal.strategy,
                strength = %signal.strength,
                raw_score = %format_args!("{:.4}", signal.raw_score),
                weight = signal.weight,
                "signal"
            );
            signals.push(signal);
        }

        let composite: f64 = signals.iter().map(|s| s.weight * s.raw_score).sum();
        let ctx = MarketContext::from_closes(ndx_closes);
        let allocation = self.combiner.combine(&ctx, composite, previous);
        allocation.validate()?;

        Ok((allocation, signals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::signals::testdata;

    fn engine() -> StrategyEngine {
        StrategyEngine::new(SignalCombiner::new(StrategyConfig::default()))
    }

    #[test]
    fn refuses_short_history() {
        let closes = testdata::uptrend(WARMUP_BARS - 1);
        let err = engine()
            .evaluate(&closes, &TargetAllocation::all_cash())
            .unwrap_err();
        assert!(matches!(err, EngineError::DataGap(_)));
    }

    #[test]
    fn evaluate_is_deterministic() {
        let closes = testdata::uptrend(300);
        let prev = TargetAllocation::all_cash();
        let (a1, s1) = engine().evaluate(&closes, &prev).unwrap();
        let (a2, s2) = engine().evaluate(&closes, &prev).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(s1.len(), s2.len());
        assert_eq!(a1.composite, a2.composite);
    }

    #[test]
    fn composite_is_weighted_sum() {
        let closes = testdata::uptrend(300);
        let (allocation, signals) = engine()
            .evaluate(&closes, &TargetAllocation::all_cash())
            .unwrap();
        let expected: f64 = signals.iter().map(|s| s.weight * s.raw_score).sum();
        assert_eq!(allocation.composite, expected);
    }

    #[test]
    fn calm_uptrend_allocates_long() {
        // Constant-return uptrend has zero realized vol -> full TQQQ.
        let closes = testdata::uptrend(300);
        let (allocation, _) = engine()
            .evaluate(&closes, &TargetAllocation::all_cash())
            .unwrap();
        assert!(allocation.tqqq > rust_decimal::Decimal::ZERO);
        assert_eq!(allocation.sqqq, rust_decimal::Decimal::ZERO);
    }
}
