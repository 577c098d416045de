//! Brokerage integrations.
//!
//! One trait, two real shapes: the Alpaca HTTP client and an in-memory
//! paper broker, plus a failover wrapper that retries the primary and
//! switches to the secondary on persistent connectivity errors.

mod alpaca;
mod failover;
mod paper;
mod types;

pub use alpaca::AlpacaClient;
pub use failover::{FailoverBroker, RetryPolicy};
pub use paper::PaperBroker;
pub use types::*;

use async_trait::async_trait;

use crate::error::EngineError;

/// Unified brokerage capability set. Quantities are whole shares.
#[async_trait]
pub trait Brokerage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current equity, cash, and open positions.
    async fn get_account(&self) -> Result<AccountSnapshot, EngineError>;

    /// Submit a market order; returns the broker's order id.
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError>;

    /// Current fill state of a previously submitted order.
    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError>;

    /// Cancel an open order. Returns true when acknowledged.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError>;

    async fn is_market_open(&self) -> Result<bool, EngineError>;
}
