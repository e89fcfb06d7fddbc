//! Concurrent dispatch engine: two tier worker pools fed by one
//! dispatcher-owned state, with quota-aware pausing, fallback between tiers
//! and a durable result cache.

pub mod dispatcher;
mod pool;
pub mod report;
pub mod retry;
mod state;

#[cfg(test)]
mod testing;

pub use dispatcher::{DispatchOptions, Dispatcher};
pub use report::{RunReport, RunStats};
pub use retry::BackoffPolicy;
pub use state::Phase;
