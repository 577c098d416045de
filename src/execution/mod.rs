//! Order planning and execution.

mod executor;
mod reconciler;

pub use executor::{ExecutionReport, OrderExecutor, OrderOutcome};
pub use reconciler::{allocation_from_positions, Reconciler};
