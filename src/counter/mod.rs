//! # Counter Engine
//!
//! Named integer counters addressed by `(namespace, counter_name)`, shared
//! across processes and updated concurrently from multiple nodes. Three
//! interchangeable strategies trade latency against correctness:
//! - [`BestEffortCounter`]: one atomic integer key, no coordination
//! - [`EventualCounter`]: per-node deltas folded into a total by the rollup
//! - [`AccurateCounter`]: per-node deltas reconciled into a snapshot on every
//!   read and write
//!
//! All strategies speak the same contract ([`AsyncCounter`], with
//! [`BlockingCounter`] as the synchronous surface), deduplicate retried
//! mutations through idempotency markers, and coordinate exclusively through
//! backing-store atomics; the library holds no locks and caches no values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::keys;
use crate::store::StoreError;
use crate::token::IdempotencyToken;

/// Counter operation error types
#[derive(Error, Debug)]
pub enum CounterError {
    /// Rejected at the entry point; never reached the backing store
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Backing-store failure, carrying error code `REDIS_ERROR`
    #[error("Counter operation failed [REDIS_ERROR]: {0}")]
    Store(#[from] StoreError),
}

impl CounterError {
    /// Stable error code for operators and log filters.
    pub fn code(&self) -> &'static str {
        match self {
            CounterError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CounterError::Store(_) => "REDIS_ERROR",
        }
    }
}

/// Result type for counter operations
pub type CounterResult<T> = std::result::Result<T, CounterError>;

/// Construction-time configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("node id is required for the {0} strategy")]
    MissingNodeId(Consistency),

    #[error("unsupported consistency: {0}")]
    UnsupportedConsistency(String),
}

/// Consistency level of a counter strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consistency {
    /// Single-key atomic increments, no cross-node bookkeeping
    BestEffort,
    /// Per-node deltas, consolidated by the periodic rollup
    EventuallyConsistent,
    /// Per-node deltas, reconciled on every read and write
    Accurate,
}

impl Consistency {
    /// Canonical name, also accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::BestEffort => "BEST_EFFORT",
            Consistency::EventuallyConsistent => "EVENTUALLY_CONSISTENT",
            Consistency::Accurate => "ACCURATE",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consistency {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BEST_EFFORT" => Ok(Consistency::BestEffort),
            "EVENTUALLY_CONSISTENT" => Ok(Consistency::EventuallyConsistent),
            "ACCURATE" => Ok(Consistency::Accurate),
            other => Err(ConfigError::UnsupportedConsistency(other.to_string())),
        }
    }
}

/// An observed counter value.
///
/// Immutable; `timestamp` is the instant the reading was assembled by the
/// strategy, and `token` echoes the idempotency token of the mutation that
/// produced it, when there was one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterReading {
    /// The observed value
    pub value: i64,

    /// When the reading was assembled
    pub timestamp: DateTime<Utc>,

    /// Which strategy produced it
    pub consistency: Consistency,

    /// Token of the mutation that produced it, if any
    pub token: Option<IdempotencyToken>,
}

impl CounterReading {
    pub(crate) fn now(value: i64, consistency: Consistency, token: Option<&IdempotencyToken>) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            consistency,
            token: token.cloned(),
        }
    }
}

/// The non-blocking counter contract.
///
/// `add` and `clear` are fire-and-forget; `add_and_get` and `get` return a
/// [`CounterReading`]. A mutation accompanied by a token whose marker already
/// exists has no additional effect.
#[async_trait]
pub trait AsyncCounter: Send + Sync {
    /// Apply a delta (positive or negative).
    async fn add(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()>;

    /// Apply a delta and return the strategy's view after application.
    async fn add_and_get(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<CounterReading>;

    /// Read the current value.
    async fn get(&self, namespace: &str, name: &str) -> CounterResult<CounterReading>;

    /// Reset the counter to zero and drop any delta accumulators.
    async fn clear(
        &self,
        namespace: &str,
        name: &str,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()>;

    /// The consistency this strategy tags its readings with.
    fn consistency(&self) -> Consistency;
}

/// The blocking counter contract: the same operations, run to completion on
/// the caller's thread.
pub trait BlockingCounter: Send + Sync {
    /// Apply a delta (positive or negative).
    fn add(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()>;

    /// Apply a delta and return the strategy's view after application.
    fn add_and_get(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<CounterReading>;

    /// Read the current value.
    fn get(&self, namespace: &str, name: &str) -> CounterResult<CounterReading>;

    /// Reset the counter to zero and drop any delta accumulators.
    fn clear(
        &self,
        namespace: &str,
        name: &str,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()>;

    /// The consistency this strategy tags its readings with.
    fn consistency(&self) -> Consistency;
}

/// Validate namespace and counter name at an operation entry point.
pub(crate) fn validate(namespace: &str, name: &str) -> CounterResult<()> {
    keys::validate_part("namespace", namespace).map_err(CounterError::InvalidArgument)?;
    keys::validate_part("counter name", name).map_err(CounterError::InvalidArgument)
}

/// Parse a stored decimal value; absent keys read as zero.
pub(crate) fn parse_stored(key: &str, raw: Option<String>) -> Result<i64, StoreError> {
    match raw {
        None => Ok(0),
        Some(text) => text
            .parse()
            .map_err(|_| StoreError::Command(format!("key '{key}' is not an integer: '{text}'"))),
    }
}

// Module declarations
pub mod accurate;
pub mod best_effort;
pub mod blocking;
pub mod eventual;
pub mod factory;
pub mod idempotency;

// Re-exports for convenience
pub use accurate::AccurateCounter;
pub use best_effort::BestEffortCounter;
pub use blocking::BlockingCounterAdapter;
pub use eventual::{DeltaLayout, EventualCounter};
pub use factory::{CounterFactory, CounterHandle};
pub use idempotency::IdempotencyOptions;
