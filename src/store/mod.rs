//! # Backing-Store Access Layer
//!
//! This module provides resilient, pooled access to the replicated key/value
//! service behind the counter engine:
//! - Sentinel-based discovery of the monitored primary
//! - An abstract command surface ([`StoreConnection`]) with a Redis adapter
//!   and an in-process memory backend for tests and local development
//! - Connection pooling with borrow/return testing and max-wait fairness
//! - Retry with a fixed wait between attempts
//! - A circuit breaker over failure rate and slow-call rate
//!
//! The [`StoreManager`] composes all of the above and is the only way the
//! counter strategies and the rollup sweep touch the store.

use std::time::Duration;
use thiserror::Error;

/// Store access error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// No sentinel could name a primary
    #[error("Sentinel discovery error: {0}")]
    Sentinel(String),

    /// Connection establishment error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command execution error
    #[error("Command error: {0}")]
    Command(String),

    /// Borrow waited longer than the configured max-wait
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Circuit breaker rejected the call
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Command exceeded the per-command timeout
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// Error surfaced by the Redis client
    #[error("Store client error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Manager has been closed
    #[error("Store manager is closed")]
    Closed,
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

// Module declarations
pub mod breaker;
pub mod config;
pub mod connection;
pub mod manager;
pub mod memory;
pub mod pool;
pub mod retry;

// Re-exports for convenience
pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use config::{CircuitBreakerConfig, PoolConfig, RetryConfig, StoreConfig};
pub use connection::{ConnectionFactory, RedisConnector, StoreConnection};
pub use manager::{HealthReport, StoreManager};
pub use memory::{MemoryConnector, MemoryStore};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use retry::RetryPolicy;
