//! The backing-store manager: pooled, retried, circuit-broken command access.
//!
//! Every store touch in the library goes through [`StoreManager::execute`]
//! (non-blocking) or [`StoreManager::execute_blocking`]. Per attempt the
//! manager asks the breaker for admission, borrows one connection, runs the
//! caller's operation against it, classifies the outcome (errors and call
//! duration feed the breaker), and gives the connection back exactly once;
//! the retry policy wraps the whole attempt sequence.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::store::breaker::{BreakerStats, CircuitBreaker};
use crate::store::config::StoreConfig;
use crate::store::connection::{ConnectionFactory, RedisConnector, StoreConnection};
use crate::store::pool::{ConnectionPool, PoolStats};
use crate::store::retry::RetryPolicy;
use crate::store::Result;

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Whether a ping round-trip succeeded
    pub healthy: bool,

    /// Ping latency (or time to failure)
    pub latency: Duration,

    /// Error message if unhealthy
    pub error: Option<String>,
}

/// Pooled, resilient access to the sentinel-discovered primary.
pub struct StoreManager {
    pool: ConnectionPool,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    runtime: tokio::runtime::Handle,
    config: StoreConfig,
}

impl StoreManager {
    /// Connect to the sentinel-discovered primary described by `config`.
    pub async fn connect(config: StoreConfig) -> Self {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(RedisConnector::new(config.clone()));
        Self::with_factory(factory, config).await
    }

    /// Build a manager over an explicit connection factory.
    ///
    /// This is how the in-process backend (and anything else implementing
    /// the command surface) is plugged in.
    pub async fn with_factory(factory: Arc<dyn ConnectionFactory>, config: StoreConfig) -> Self {
        let pool = ConnectionPool::new(factory, config.pool.clone()).await;
        Self {
            pool,
            retry: RetryPolicy::new(config.retry.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            runtime: tokio::runtime::Handle::current(),
            config,
        }
    }

    /// Non-blocking execute: run `op` against one borrowed connection.
    ///
    /// The operation may be invoked several times (retry); each invocation
    /// gets its own borrowed connection and is separately admitted by the
    /// breaker. Cancellation never leaks the borrow: the connection returns
    /// to the pool when the operation future is dropped.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn StoreConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry.execute(|| self.attempt(&op)).await
    }

    /// Blocking execute: the same composition driven on the caller's thread.
    pub fn execute_blocking<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn StoreConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let fut = self.execute(op);
        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| self.runtime.block_on(fut))
        } else {
            self.runtime.block_on(fut)
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &F) -> Result<T>
    where
        F: Fn(Arc<dyn StoreConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.try_acquire()?;
        let started = Instant::now();
        let result = self.run_on_pooled(op).await;
        self.breaker.record(result.is_ok(), started.elapsed());
        result
    }

    async fn run_on_pooled<T, F, Fut>(&self, op: &F) -> Result<T>
    where
        F: Fn(Arc<dyn StoreConnection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.pool.acquire().await?;
        let result = op(guard.connection()).await;
        if result.is_err() {
            guard.invalidate();
        }
        guard.release().await;
        result
    }

    /// Perform a health check
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let result = self.execute(|conn| async move { conn.ping().await }).await;
        HealthReport {
            healthy: result.is_ok(),
            latency: started.elapsed(),
            error: result.err().map(|err| err.to_string()),
        }
    }

    /// Pool statistics snapshot.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Breaker statistics snapshot.
    pub fn breaker_stats(&self) -> BreakerStats {
        self.breaker.stats()
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Close the manager: drain the pool and fail subsequent calls.
    pub fn close(&self) {
        self.pool.close();
    }
}
