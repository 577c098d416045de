//! Order and account types shared across brokerages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Rejected,
    Canceled,
}

impl OrderStatus {
    /// Terminal states stop the polling loop. A partial fill on a market
    /// order is final: the unfilled remainder is not re-submitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::PartiallyFilled | Self::Rejected | Self::Canceled
        )
    }
}

/// Fill state of an order as reported by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_quantity: u64,
    pub avg_fill_price: Decimal,
    pub status: OrderStatus,
}

/// A single open position. Quantities are whole shares; short positions
/// are never held (inverse exposure is SQQQ long).
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub market_value: Decimal,
}

/// Account state at one instant: equity = cash + sum of market values.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
}

impl AccountSnapshot {
    pub fn quantity_of(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }

    pub fn market_value_of(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map_or(Decimal::ZERO, |p| p.market_value)
    }
}

/// One order of a reconciliation plan. Quantity is always positive; the
/// side carries the direction.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub estimated_notional: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
    }

    #[test]
    fn snapshot_lookups_default_to_zero() {
        let mut snapshot = AccountSnapshot {
            equity: dec!(1000),
            cash: dec!(500),
            positions: HashMap::new(),
        };
        snapshot.positions.insert(
            "TQQQ".to_string(),
            Position {
                symbol: "TQQQ".to_string(),
                quantity: 10,
                avg_cost: dec!(50),
                market_value: dec!(500),
            },
        );
        assert_eq!(snapshot.quantity_of("TQQQ"), 10);
        assert_eq!(snapshot.quantity_of("SQQQ"), 0);
        assert_eq!(snapshot.market_value_of("SQQQ"), Decimal::ZERO);
    }
}
