//! Allocation state machine.
//!
//! Maps the market context and the previous session's allocation to the
//! target weights over {TQQQ, SQQQ, BIL}:
//!
//! 1. Volatility target: `w_tqqq = min(target_vol / vol20, 1)`.
//! 2. Crash sprint: below the 200-day SMA with elevated vol, SQQQ 30% for
//!    at most the first 15 sessions of the breakdown.
//! 3. No direct flip: one full cash session between opposite-signed
//!    leveraged positions.
//! 4. Residual weight goes to BIL.
//!
//! The combiner is a pure function of `(context, previous allocation)`;
//! the composite score is carried for telemetry only.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::info;

use crate::config::StrategyConfig;
use crate::error::EngineError;
use crate::strategy::MarketContext;

/// Weight-sum tolerance for the invariant check.
const SUM_TOLERANCE: Decimal = dec!(0.000001);

/// Nominal states plus the one-session transition forced by the no-flip
/// rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationState {
    Long,
    Sprint,
    Cash,
    Transition,
}

/// Target weights for the session. Weights are 4-decimal fixed precision,
/// sum to exactly 1.0, and at most one of TQQQ/SQQQ is positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetAllocation {
    pub tqqq: Decimal,
    pub sqqq: Decimal,
    pub bil: Decimal,
    pub state: AllocationState,
    /// Weighted sub-strategy composite, reported but never allocated on.
    pub composite: f64,
}

impl TargetAllocation {
    pub fn all_cash() -> Self {
        Self {
            tqqq: Decimal::ZERO,
            sqqq: Decimal::ZERO,
            bil: Decimal::ONE,
            state: AllocationState::Cash,
            composite: 0.0,
        }
    }

    pub fn weight(&self, symbol: &str) -> Decimal {
        match symbol {
            "TQQQ" => self.tqqq,
            "SQQQ" => self.sqqq,
            "BIL" => self.bil,
            _ => Decimal::ZERO,
        }
    }

    /// Core invariants: weights in [0,1] summing to 1, and never both
    /// leveraged legs at once.
    pub fn validate(&self) -> Result<(), EngineError> {
        let sum = self.tqqq + self.sqqq + self.bil;
        if (sum - Decimal::ONE).abs() > SUM_TOLERANCE {
            return Err(EngineError::Invariant(format!(
                "allocation weights sum to {sum}"
            )));
        }
        for (name, w) in [("TQQQ", self.tqqq), ("SQQQ", self.sqqq), ("BIL", self.bil)] {
            if w < Decimal::ZERO || w > Decimal::ONE {
                return Err(EngineError::Invariant(format!(
                    "{name} weight {w} outside [0,1]"
                )));
            }
        }
        if self.tqqq > Decimal::ZERO && self.sqqq > Decimal::ZERO {
            return Err(EngineError::Invariant(
                "simultaneous TQQQ and SQQQ exposure".into(),
            ));
        }
        Ok(())
    }
}

pub struct SignalCombiner {
    config: StrategyConfig,
}

impl SignalCombiner {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn combine(
        &self,
        ctx: &MarketContext,
        composite: f64,
        previous: &TargetAllocation,
    ) -> TargetAllocation {
        // Rule 1: volatility-targeted TQQQ weight.
        let base_tqqq = match ctx.realized_vol_20 {
            Some(vol) if vol > 0.0 => (self.config.target_vol / vol).min(1.0),
            _ => 1.0,
        };

        // Rule 2: SQQQ crash sprint, bounded to the first sessions of a
        // breakdown.
        let sprint_active = ctx.below_sma200()
            && ctx.realized_vol_20.unwrap_or(0.0) >= self.config.sprint_vol_threshold
            && ctx.days_below_sma200 >= 1
            && ctx.days_below_sma200 <= self.config.sprint_max_days;

        let (mut tqqq, mut sqqq, mut state) = if sprint_active {
            (Decimal::ZERO, self.config.sprint_sqqq_pct, AllocationState::Sprint)
        } else {
            (
                Decimal::from_f64(base_tqqq)
                    .unwrap_or(Decimal::ONE)
                    .round_dp(4),
                Decimal::ZERO,
                AllocationState::Long,
            )
        };

        // Rule 3: no direct flip between the leveraged legs.
        let flips_to_sqqq = sqqq > Decimal::ZERO && previous.tqqq > Decimal::ZERO;
        let flips_to_tqqq = tqqq > Decimal::ZERO && previous.sqqq > Decimal::ZERO;
        if flips_to_sqqq || flips_to_tqqq {
            info!(
                from = ?previous.state,
                "no-flip rule engaged, forcing one cash session"
            );
            tqqq = Decimal::ZERO;
            sqqq = Decimal::ZERO;
            state = AllocationState::Transition;
        }

        if state != AllocationState::Transition && tqqq.is_zero() && sqqq.is_zero() {
            state = AllocationState::Cash;
        }

        // Rule 4: residual weight to BIL, absorbing rounding error.
        let allocation = TargetAllocation {
            tqqq,
            sqqq,
            bil: Decimal::ONE - tqqq - sqqq,
            state,
            composite,
        };

        info!(
            tqqq = %allocation.tqqq,
            sqqq = %allocation.sqqq,
            bil = %allocation.bil,
            state = ?allocation.state,
            composite = %format_args!("{composite:.4}"),
            vol20 = ctx.realized_vol_20.unwrap_or(f64::NAN),
            days_below = ctx.days_below_sma200,
            "allocation decided"
        );

        allocation
    }
}
