//! Connection pooling over a [`ConnectionFactory`].
//!
//! Borrow slots are bounded by `max_total`; a borrow that cannot get a slot
//! within `max_wait` fails with [`StoreError::PoolExhausted`]. Idle
//! connections are retained up to `max_idle` and established up front to
//! `min_idle`. Connections are ping-tested on borrow and on return when so
//! configured; broken ones are discarded, never handed out.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::store::config::PoolConfig;
use crate::store::connection::{ConnectionFactory, StoreConnection};
use crate::store::{Result, StoreError};

/// Connection pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total connections created
    pub created: u64,

    /// Total successful borrows
    pub borrowed: u64,

    /// Total connections returned to the idle list
    pub returned: u64,

    /// Total connections discarded (broken, invalidated, or over capacity)
    pub discarded: u64,

    /// Current number of idle connections
    pub idle: usize,

    /// Current number of borrowed connections
    pub in_flight: usize,
}

struct PoolShared {
    idle: Mutex<VecDeque<Arc<dyn StoreConnection>>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    created: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
}

impl PoolShared {
    fn park(&self, conn: Arc<dyn StoreConnection>, max_idle: usize) {
        if self.closed.load(Ordering::SeqCst) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < max_idle {
            idle.push_back(conn);
            self.returned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Pool of store connections with borrow/return testing.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    shared: Arc<PoolShared>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Create a pool and establish `min_idle` connections up front.
    ///
    /// Prefill failures are logged and tolerated; the pool then grows on
    /// demand.
    pub async fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Self {
        let shared = Arc::new(PoolShared {
            idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
            permits: Arc::new(Semaphore::new(config.max_total.max(1))),
            closed: AtomicBool::new(false),
            created: AtomicU64::new(0),
            borrowed: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        });

        let pool = Self {
            factory,
            shared,
            config,
        };

        for _ in 0..pool.config.min_idle.min(pool.config.max_idle) {
            match pool.factory.connect().await {
                Ok(conn) => {
                    pool.shared.created.fetch_add(1, Ordering::Relaxed);
                    pool.shared.idle.lock().push_back(conn);
                }
                Err(err) => {
                    log::error!("Pool prefill connection failed: {err}");
                    break;
                }
            }
        }

        pool
    }

    /// Borrow a connection, waiting up to `max_wait` for a slot.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }

        let permit = tokio::time::timeout(
            self.config.max_wait,
            Arc::clone(&self.shared.permits).acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::PoolExhausted)?
        .map_err(|_| StoreError::Closed)?;

        loop {
            let candidate = self.shared.idle.lock().pop_front();
            let Some(conn) = candidate else { break };
            if self.config.test_on_borrow && conn.ping().await.is_err() {
                self.shared.discarded.fetch_add(1, Ordering::Relaxed);
                log::error!("Discarding broken idle connection on borrow");
                continue;
            }
            self.shared.borrowed.fetch_add(1, Ordering::Relaxed);
            return Ok(self.guard(conn, permit));
        }

        let conn = self.factory.connect().await?;
        self.shared.created.fetch_add(1, Ordering::Relaxed);
        self.shared.borrowed.fetch_add(1, Ordering::Relaxed);
        Ok(self.guard(conn, permit))
    }

    fn guard(&self, conn: Arc<dyn StoreConnection>, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            _permit: permit,
            shared: Arc::clone(&self.shared),
            max_idle: self.config.max_idle,
            test_on_return: self.config.test_on_return,
            invalidated: false,
        }
    }

    /// Pool statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.idle.lock().len();
        PoolStats {
            created: self.shared.created.load(Ordering::Relaxed),
            borrowed: self.shared.borrowed.load(Ordering::Relaxed),
            returned: self.shared.returned.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            idle,
            in_flight: self
                .config
                .max_total
                .saturating_sub(self.shared.permits.available_permits()),
        }
    }

    /// Close the pool: fail pending and future borrows, drop idle connections.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.permits.close();
        let mut idle = self.shared.idle.lock();
        self.shared
            .discarded
            .fetch_add(idle.len() as u64, Ordering::Relaxed);
        idle.clear();
    }
}

/// A borrowed connection.
///
/// The slot is given back exactly once: explicitly via [`release`], which
/// honors test-on-return, or implicitly on drop for callers that went away
/// mid-operation (cancelled futures return the connection untested).
///
/// [`release`]: PooledConnection::release
pub struct PooledConnection {
    conn: Option<Arc<dyn StoreConnection>>,
    _permit: OwnedSemaphorePermit,
    shared: Arc<PoolShared>,
    max_idle: usize,
    test_on_return: bool,
    invalidated: bool,
}

impl PooledConnection {
    /// The borrowed connection.
    pub fn connection(&self) -> Arc<dyn StoreConnection> {
        Arc::clone(self.conn.as_ref().expect("connection already released"))
    }

    /// Mark the connection broken; it will be discarded instead of returned.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Return the connection to the pool.
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else { return };
        if self.invalidated {
            self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.test_on_return && conn.ping().await.is_err() {
            self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            log::error!("Discarding broken connection on return");
            return;
        }
        self.shared.park(conn, self.max_idle);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.invalidated {
                self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            } else {
                self.shared.park(conn, self.max_idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn small_pool_config() -> PoolConfig {
        PoolConfig {
            max_total: 2,
            max_idle: 2,
            min_idle: 0,
            max_wait: Duration::from_millis(100),
            test_on_borrow: true,
            test_on_return: true,
        }
    }

    #[tokio::test]
    async fn test_borrow_and_return() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(Arc::new(store.connector()), small_pool_config()).await;

        let guard = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().in_flight, 1);
        guard.release().await;

        let stats = pool.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.returned, 1);
    }

    #[tokio::test]
    async fn test_max_wait_fails_borrow() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(Arc::new(store.connector()), small_pool_config()).await;

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        let denied = pool.acquire().await;
        assert!(matches!(denied, Err(StoreError::PoolExhausted)));
    }

    #[tokio::test]
    async fn test_slot_frees_on_drop() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(Arc::new(store.connector()), small_pool_config()).await;

        {
            let _a = pool.acquire().await.unwrap();
            let _b = pool.acquire().await.unwrap();
        }
        // Both guards dropped without release(); slots must be free again.
        let again = pool.acquire().await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_invalidated_connection_is_discarded() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(Arc::new(store.connector()), small_pool_config()).await;

        let mut guard = pool.acquire().await.unwrap();
        guard.invalidate();
        guard.release().await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_min_idle_prefill() {
        let store = MemoryStore::new();
        let config = PoolConfig {
            min_idle: 2,
            ..small_pool_config()
        };
        let pool = ConnectionPool::new(Arc::new(store.connector()), config).await;
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.stats().created, 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_borrows() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(Arc::new(store.connector()), small_pool_config()).await;
        pool.close();
        assert!(matches!(pool.acquire().await, Err(StoreError::Closed)));
    }
}
