//! In-memory paper broker for dry runs, tests, and backtests.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
#[cfg(test)]
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::broker::{
    AccountSnapshot, Brokerage, Fill, OrderSide, OrderStatus, Position,
};
use crate::error::EngineError;

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Fill>,
    prices: HashMap<String, Decimal>,
}

/// Simulated brokerage holding cash and whole-share positions. Orders
/// fill immediately at the configured mark price; a fill ratio below 1
/// simulates partial fills.
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
    order_counter: AtomicU64,
    fill_ratio: RwLock<Decimal>,
    market_open: RwLock<bool>,
}

impl PaperBroker {
    pub fn new(initial_cash: Decimal) -> Self {
        let state = PaperState {
            cash: initial_cash,
            ..PaperState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            order_counter: AtomicU64::new(1),
            fill_ratio: RwLock::new(Decimal::ONE),
            market_open: RwLock::new(true),
        }
    }

    /// Set the mark price used for fills and position valuation.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        state.prices.insert(symbol.to_string(), price);
        revalue(&mut state);
    }

    /// Seed an existing position (for tests and replay setup).
    pub async fn set_position(&self, symbol: &str, quantity: i64, avg_cost: Decimal) {
        let mut state = self.state.write().await;
        let price = state.prices.get(symbol).copied().unwrap_or(avg_cost);
        state.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                quantity,
                avg_cost,
                market_value: Decimal::from(quantity) * price,
            },
        );
    }

    /// Fraction of each order that fills (1.0 = complete fills).
    pub async fn set_fill_ratio(&self, ratio: Decimal) {
        *self.fill_ratio.write().await = ratio;
    }

    pub async fn set_market_open(&self, open: bool) {
        *self.market_open.write().await = open;
    }

    async fn equity(&self) -> Decimal {
        let state = self.state.read().await;
        state.cash
            + state
                .positions
                .values()
                .map(|p| p.market_value)
                .sum::<Decimal>()
    }
}

fn revalue(state: &mut PaperState) {
    for position in state.positions.values_mut() {
        if let Some(price) = state.prices.get(&position.symbol) {
            position.market_value = Decimal::from(position.quantity) * *price;
        }
    }
}

#[async_trait]
impl Brokerage for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        let equity = self.equity().await;
        let state = self.state.read().await;
        Ok(AccountSnapshot {
            equity,
            cash: state.cash,
            positions: state.positions.clone(),
        })
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError> {
        if quantity == 0 {
            return Err(EngineError::OrderRejected(format!(
                "{symbol}: zero quantity"
            )));
        }

        let fill_ratio = *self.fill_ratio.read().await;
        let mut state = self.state.write().await;

        let price = *state.prices.get(symbol).ok_or_else(|| {
            EngineError::OrderRejected(format!("{symbol}: no mark price"))
        })?;

        let requested = Decimal::from(quantity);
        let filled = (requested * fill_ratio).floor();
        let filled_quantity = filled.to_u64().unwrap_or(0);
        let notional = filled * price;

        match side {
            OrderSide::Buy => {
                if notional > state.cash {
                    return Err(EngineError::OrderRejected(format!(
                        "{symbol}: insufficient buying power ({} needed, {} cash)",
                        notional, state.cash
                    )));
                }
                state.cash -= notional;
                let position =
                    state
                        .positions
                        .entry(symbol.to_string())
                        .or_insert_with(|| Position {
                            symbol: symbol.to_string(),
                            quantity: 0,
                            avg_cost: Decimal::ZERO,
                            market_value: Decimal::ZERO,
                        });
                let old_qty = Decimal::from(position.quantity);
                let new_qty = old_qty + filled;
                if new_qty > Decimal::ZERO {
                    position.avg_cost =
                        (position.avg_cost * old_qty + notional) / new_qty;
                }
                position.quantity += filled_quantity as i64;
            }
            OrderSide::Sell => {
                let held = state.positions.get(symbol).map_or(0, |p| p.quantity);
                if (filled_quantity as i64) > held {
                    return Err(EngineError::OrderRejected(format!(
                        "{symbol}: sell of {filled_quantity} exceeds {held} held"
                    )));
                }
                state.cash += notional;
                if let Some(position) = state.positions.get_mut(symbol) {
                    position.quantity -= filled_quantity as i64;
                }
                state.positions.retain(|_, p| p.quantity != 0);
            }
        }
        revalue(&mut state);

        let order_id = format!("paper-{}", self.order_counter.fetch_add(1, Ordering::SeqCst));
        let status = if filled_quantity == quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        state.orders.insert(
            order_id.clone(),
            Fill {
                order_id: order_id.clone(),
                symbol: symbol.to_string(),
                side,
                filled_quantity,
                avg_fill_price: price,
                status,
            },
        );

        info!(%symbol, %side, quantity, filled_quantity, %price, %order_id, "paper order");
        Ok(order_id)
    }

    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
        let state = self.state.read().await;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::broker_fatal(format!("unknown order {order_id}")))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(order_id) {
            Some(fill) if !fill.status.is_terminal() => {
                fill.status = OrderStatus::Canceled;
                debug!(%order_id, "paper order canceled");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::broker_fatal(format!(
                "unknown order {order_id}"
            ))),
        }
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        Ok(*self.market_open.read().await)
    }
}
