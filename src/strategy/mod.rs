//! Strategy layer: market context, the allocation state machine, and the
//! engine that wires sub-strategies into it.

mod combiner;
mod context;
mod engine;

pub use combiner::{AllocationState, SignalCombiner, TargetAllocation};
pub use context::MarketContext;
pub use engine::{StrategyEngine, WARMUP_BARS};
