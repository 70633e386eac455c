//! Abstract command surface and the Redis adapter behind it.
//!
//! The counter engine consumes the store only through [`StoreConnection`]:
//! get/set, delete, existence, atomic integer and hash-field increment, full
//! hash read, per-field delete, and cursor-based scan. [`RedisConnector`]
//! produces connections to the sentinel-discovered primary; the in-process
//! backend in [`crate::store::memory`] implements the same surface.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::store::config::StoreConfig;
use crate::store::{Result, StoreError};

/// The backing-store command surface.
///
/// Implementations are shared between concurrent callers; every method takes
/// `&self`. The `keys` operation is legacy and discouraged: it blocks the
/// store on large key-spaces, use `scan` instead.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Liveness probe, used for test-on-borrow and health checks.
    async fn ping(&self) -> Result<()>;

    /// Read a string value; `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write a value with a TTL only if the key does not exist.
    ///
    /// Returns `true` when this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key.
    async fn del(&self, key: &str) -> Result<()>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically increment an integer key, returning the post value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomically increment one hash field, returning the post value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Read a whole hash; empty map when the key is absent.
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Delete specific hash fields.
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<()>;

    /// Legacy whole-keyspace pattern match.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Cursor-based pattern scan; cursor `0` on return means exhausted.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
}

/// Produces fresh connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Establish one connection to the store.
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>>;
}

// ============================================================================
// Redis adapter
// ============================================================================

/// A [`StoreConnection`] over one multiplexed Redis connection.
pub struct RedisConnection {
    conn: redis::aio::MultiplexedConnection,
    command_timeout: Duration,
}

impl RedisConnection {
    /// Wrap an established connection.
    pub fn new(conn: redis::aio::MultiplexedConnection, command_timeout: Duration) -> Self {
        Self {
            conn,
            command_timeout,
        }
    }

    async fn run<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.command_timeout, cmd.query_async::<_, T>(&mut conn)).await
        {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn ping(&self) -> Result<()> {
        let _: String = self.run(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(&cmd).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        let _: () = self.run(&cmd).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1));
        let reply: Option<String> = self.run(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _: i64 = self.run(&cmd).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let count: i64 = self.run(&cmd).await?;
        Ok(count > 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(delta);
        self.run(&cmd).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut cmd = redis::cmd("HINCRBY");
        cmd.arg(key).arg(field).arg(delta);
        self.run(&cmd).await
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(key);
        self.run(&cmd).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field);
        }
        let _: i64 = self.run(&cmd).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cmd = redis::cmd("KEYS");
        cmd.arg(pattern);
        self.run(&cmd).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);
        self.run(&cmd).await
    }
}

// ============================================================================
// Sentinel discovery
// ============================================================================

/// Factory connecting to the sentinel-discovered primary.
///
/// Each connect re-resolves the primary, so a failover between borrows is
/// picked up the next time the pool grows or replaces a broken connection.
pub struct RedisConnector {
    config: StoreConfig,
}

impl RedisConnector {
    /// Create a connector for the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Ask each sentinel in order for the current primary address.
    async fn resolve_primary(&self) -> Result<(String, u16)> {
        for sentinel in &self.config.sentinels {
            let url = format!("redis://{sentinel}/");
            let client = match redis::Client::open(url.as_str()) {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(%sentinel, error = %err, "invalid sentinel address");
                    continue;
                }
            };
            let mut conn = match tokio::time::timeout(
                self.config.command_timeout,
                client.get_multiplexed_tokio_connection(),
            )
            .await
            {
                Ok(Ok(conn)) => conn,
                Ok(Err(err)) => {
                    tracing::warn!(%sentinel, error = %err, "sentinel unreachable");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(%sentinel, "sentinel connect timed out");
                    continue;
                }
            };

            let mut cmd = redis::cmd("SENTINEL");
            cmd.arg("get-master-addr-by-name")
                .arg(&self.config.primary_name);
            let reply: std::result::Result<Vec<String>, redis::RedisError> = tokio::time::timeout(
                self.config.command_timeout,
                cmd.query_async(&mut conn),
            )
            .await
            .unwrap_or_else(|_| {
                Err(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "sentinel query timed out",
                )))
            });

            match reply {
                Ok(addr) if addr.len() == 2 => {
                    if let Ok(port) = addr[1].parse::<u16>() {
                        tracing::info!(
                            primary = %self.config.primary_name,
                            host = %addr[0],
                            port,
                            "resolved primary via sentinel"
                        );
                        return Ok((addr[0].clone(), port));
                    }
                    tracing::warn!(%sentinel, port = %addr[1], "sentinel returned unparsable port");
                }
                Ok(_) => {
                    tracing::warn!(
                        %sentinel,
                        primary = %self.config.primary_name,
                        "sentinel does not monitor the requested primary"
                    );
                }
                Err(err) => {
                    tracing::warn!(%sentinel, error = %err, "sentinel query failed");
                }
            }
        }

        Err(StoreError::Sentinel(format!(
            "no sentinel could resolve primary '{}'",
            self.config.primary_name
        )))
    }

    fn primary_url(&self, host: &str, port: u16) -> String {
        let scheme = if self.config.use_tls { "rediss" } else { "redis" };
        match &self.config.password {
            Some(password) => format!("{scheme}://:{password}@{host}:{port}/"),
            None => format!("{scheme}://{host}:{port}/"),
        }
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>> {
        let (host, port) = self.resolve_primary().await?;
        let url = self.primary_url(&host, port);
        let client = redis::Client::open(url.as_str())?;
        let conn = tokio::time::timeout(
            self.config.command_timeout,
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| StoreError::Connection(format!("connect to {host}:{port} timed out")))??;
        Ok(Arc::new(RedisConnection::new(
            conn,
            self.config.command_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_url_plain() {
        let connector = RedisConnector::new(StoreConfig::default());
        assert_eq!(
            connector.primary_url("10.0.0.5", 6379),
            "redis://10.0.0.5:6379/"
        );
    }

    #[test]
    fn test_primary_url_with_password_and_tls() {
        let config = StoreConfig {
            password: Some("hunter2".to_string()),
            use_tls: true,
            ..Default::default()
        };
        let connector = RedisConnector::new(config);
        assert_eq!(
            connector.primary_url("10.0.0.5", 6380),
            "rediss://:hunter2@10.0.0.5:6380/"
        );
    }

    #[tokio::test]
    async fn test_resolution_fails_without_reachable_sentinel() {
        let config = StoreConfig {
            sentinels: vec!["127.0.0.1:1".to_string()],
            command_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let connector = RedisConnector::new(config);
        assert!(matches!(
            connector.resolve_primary().await,
            Err(StoreError::Sentinel(_))
        ));
    }
}
