//! Store, pool, and resilience configuration.
//!
//! All fields are fixed at construction; the manager never re-reads them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backing-store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sentinel endpoints as `host:port`
    pub sentinels: Vec<String>,

    /// Logical name of the monitored primary
    pub primary_name: String,

    /// Password for the primary (optional)
    pub password: Option<String>,

    /// Enable TLS towards the primary
    pub use_tls: bool,

    /// Per-command timeout
    pub command_timeout: Duration,

    /// Connection pool sizing
    pub pool: PoolConfig,

    /// Retry policy
    pub retry: RetryConfig,

    /// Circuit breaker policy
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sentinels: vec!["localhost:26379".to_string()],
            primary_name: "mymaster".to_string(),
            password: None,
            use_tls: false,
            command_timeout: Duration::from_secs(5),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of concurrently borrowed connections
    pub max_total: usize,

    /// Maximum number of idle connections retained
    pub max_idle: usize,

    /// Idle connections established up front
    pub min_idle: usize,

    /// How long a borrow may wait before failing
    pub max_wait: Duration,

    /// Ping connections when borrowed
    pub test_on_borrow: bool,

    /// Ping connections when returned
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 16,
            max_idle: 8,
            min_idle: 2,
            max_wait: Duration::from_secs(5),
            test_on_borrow: true,
            test_on_return: true,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, first call included
    pub max_attempts: u32,

    /// Fixed wait between attempts
    pub wait_between: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_between: Duration::from_millis(200),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Size of the count-based outcome window; clamped to at least 10
    pub window_size: usize,

    /// Failure rate opening the circuit (0.0 - 1.0)
    pub failure_rate_threshold: f64,

    /// Calls slower than this are classified slow
    pub slow_call_threshold: Duration,

    /// Slow-call rate opening the circuit (0.0 - 1.0)
    pub slow_call_rate_threshold: f64,

    /// How long the circuit stays open before probing
    pub open_duration: Duration,

    /// Trial calls admitted in the half-open state
    pub half_open_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_rate_threshold: 0.5,
            slow_call_threshold: Duration::from_secs(2),
            slow_call_rate_threshold: 0.5,
            open_duration: Duration::from_secs(30),
            half_open_calls: 3,
        }
    }
}
