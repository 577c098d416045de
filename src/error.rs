//! Typed error kinds for the trading engine.
//!
//! Every failure path carries one of these kinds so callers can decide
//! between retry, failover, and surfacing. Process exit codes for the CLI
//! are derived from the kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bars missing for the current or previous session, or the cache is
    /// stale beyond tolerance. No orders may be placed.
    #[error("data gap: {0}")]
    DataGap(String),

    /// Transient market-data provider failure (5xx, timeout, rate limit).
    #[error("provider error: {0}")]
    Provider(String),

    /// Brokerage-layer failure. `retriable` distinguishes connectivity
    /// problems (retry, then failover) from hard errors.
    #[error("broker error (retriable={retriable}): {message}")]
    Broker { message: String, retriable: bool },

    /// The broker explicitly rejected an order (insufficient buying power,
    /// halted symbol, risk rejection). Final for that order.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Past `market_close - buffer`; no new orders may be issued.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A core invariant failed (weights not summing to one, negative
    /// quantity, direct flip). Fail fast, place no orders.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Bad or missing configuration / secret at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn broker_transient(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
            retriable: true,
        }
    }

    pub fn broker_fatal(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
            retriable: false,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::Broker { retriable: true, .. }
        )
    }

    /// CLI exit code for this kind: 0 success, 2 config, 3 data,
    /// 4 broker, 5 deadline.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::DataGap(_) | Self::Provider(_) => 3,
            Self::Broker { .. } | Self::OrderRejected(_) => 4,
            Self::DeadlineExceeded(_) => 5,
            Self::Invariant(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(EngineError::broker_transient("timeout").is_retriable());
        assert!(!EngineError::broker_fatal("bad symbol").is_retriable());
        assert!(EngineError::Provider("503".into()).is_retriable());
        assert!(!EngineError::OrderRejected("halted".into()).is_retriable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::Config("missing key".into()).exit_code(), 2);
        assert_eq!(EngineError::DataGap("no bars".into()).exit_code(), 3);
        assert_eq!(EngineError::broker_fatal("down").exit_code(), 4);
        assert_eq!(
            EngineError::DeadlineExceeded("past close".into()).exit_code(),
            5
        );
    }
}
