//! Reconciliation: target weights against live positions.
//!
//! Produces the minimum set of market orders that moves the account to
//! the target allocation, with all SELLs ahead of all BUYs and a
//! deterministic alphabetical order inside each group.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::broker::{AccountSnapshot, OrderSide, PlannedOrder};
use crate::config::{ExecutionConfig, StrategyConfig};
use crate::error::EngineError;
use crate::strategy::{AllocationState, TargetAllocation};

/// The three instruments a plan can touch, reconciled in this order.
pub const PLAN_SYMBOLS: [&str; 3] = ["BIL", "SQQQ", "TQQQ"];

pub struct Reconciler {
    min_order_notional: Decimal,
    rebalance_threshold: Decimal,
}

impl Reconciler {
    pub fn new(strategy: &StrategyConfig, execution: &ExecutionConfig) -> Self {
        Self {
            min_order_notional: execution.min_order_notional,
            rebalance_threshold: strategy.rebalance_threshold,
        }
    }

    /// Compute the ordered plan (sells first, each group alphabetical).
    pub fn plan(
        &self,
        target: &TargetAllocation,
        snapshot: &AccountSnapshot,
        closes: &HashMap<String, Decimal>,
    ) -> Result<Vec<PlannedOrder>, EngineError> {
        target.validate()?;

        if snapshot.equity <= Decimal::ZERO {
            return Err(EngineError::Invariant(format!(
                "non-positive equity {}",
                snapshot.equity
            )));
        }

        let mut sells = Vec::new();
        let mut buys = Vec::new();

        for symbol in PLAN_SYMBOLS {
            let close = match closes.get(symbol) {
                Some(c) if *c > Decimal::ZERO => *c,
                _ => {
                    return Err(EngineError::DataGap(format!(
                        "no usable close for {symbol}"
                    )))
                }
            };

            let target_notional = target.weight(symbol) * snapshot.equity;
            let target_shares = (target_notional / close)
                .floor()
                .to_i64()
                .ok_or_else(|| {
                    EngineError::Invariant(format!("{symbol}: share count overflow"))
                })?;
            if target_shares < 0 {
                return Err(EngineError::Invariant(format!(
                    "{symbol}: negative target share count {target_shares}"
                )));
            }

            let current_shares = snapshot.quantity_of(symbol);
            let delta = target_shares - current_shares;
            if delta == 0 {
                continue;
            }

            let quantity = delta.unsigned_abs();
            let order_notional = Decimal::from(quantity) * close;

            if order_notional < self.min_order_notional {
                debug!(%symbol, %order_notional, "dropping order below minimum notional");
                continue;
            }
            if order_notional < self.rebalance_threshold * snapshot.equity {
                info!(
                    %symbol,
                    %order_notional,
                    threshold = %(self.rebalance_threshold * snapshot.equity),
                    "dropping order below rebalance threshold"
                );
                continue;
            }

            let side = if delta < 0 {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let order = PlannedOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                estimated_notional: order_notional,
            };
            info!(
                %symbol,
                %side,
                quantity,
                notional = %order_notional,
                target_shares,
                current_shares,
                "planned order"
            );
            match side {
                OrderSide::Sell => sells.push(order),
                OrderSide::Buy => buys.push(order),
            }
        }

        // PLAN_SYMBOLS is alphabetical, so each group already is; sells
        // lead the combined plan.
        sells.extend(buys);
        Ok(sells)
    }
}

/// Derive the previous session's allocation from live positions, keeping
/// the engine stateless between runs. Position weights round to 4
/// decimals; the residual is treated as BIL.
pub fn allocation_from_positions(snapshot: &AccountSnapshot) -> TargetAllocation {
    if snapshot.equity <= Decimal::ZERO {
        return TargetAllocation::all_cash();
    }
    let weight_of = |symbol: &str| {
        (snapshot.market_value_of(symbol) / snapshot.equity)
            .round_dp(4)
            .clamp(Decimal::ZERO, Decimal::ONE)
    };
    let tqqq = weight_of("TQQQ");
    let sqqq = weight_of("SQQQ");
    let state = if tqqq > Decimal::ZERO {
        AllocationState::Long
    } else if sqqq > Decimal::ZERO {
        AllocationState::Sprint
    } else {
        AllocationState::Cash
    };
    TargetAllocation {
        tqqq,
        sqqq,
        bil: Decimal::ONE - tqqq - sqqq,
        state,
        composite: 0.0,
    }
}
