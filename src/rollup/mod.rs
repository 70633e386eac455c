//! # Rollup
//!
//! The periodic process that folds per-node delta accumulators into
//! consolidated totals. One [`DeltaSweep`] covers one namespace; the
//! schedulers drive it on an interval, in a non-blocking (spawned task) or
//! blocking (dedicated thread) flavor matched to the counter surface in use.
//!
//! The sweep is stateless and idempotent: a failed tick is logged and
//! skipped, and the next tick picks up whatever survived.

use thiserror::Error;

use crate::store::StoreError;

/// Rollup error types
#[derive(Error, Debug)]
pub enum RollupError {
    /// Store access failed during a sweep
    #[error("Rollup store access failed: {0}")]
    Store(#[from] StoreError),
}

/// Result type for rollup operations
pub type RollupResult<T> = std::result::Result<T, RollupError>;

// Module declarations
pub mod scheduler;
pub mod sweep;

// Re-exports for convenience
pub use scheduler::{BlockingRollupScheduler, RollupFactory, RollupHandle, RollupScheduler};
pub use sweep::{DeltaSweep, SweepReport};
