//! Best-effort strategy: one atomic integer key per counter.
//!
//! The lowest-latency strategy. All nodes increment the same key
//! (`counter:{ns}:{c}`), so the store's atomic increment is the only
//! coordination. The value returned by `add_and_get` is exactly the store's
//! post-increment reply.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::counter::idempotency::{self, IdempotencyOptions};
use crate::counter::{
    parse_stored, validate, AsyncCounter, Consistency, CounterReading, CounterResult,
};
use crate::keys;
use crate::store::StoreManager;
use crate::token::IdempotencyToken;

/// Single-key atomic counter.
pub struct BestEffortCounter {
    manager: Arc<StoreManager>,
    marker_ttl: Duration,
}

impl BestEffortCounter {
    /// Create a best-effort counter with default idempotency options.
    pub fn new(manager: Arc<StoreManager>) -> Self {
        Self::with_options(manager, IdempotencyOptions::default())
    }

    /// Create a best-effort counter with explicit idempotency options.
    pub fn with_options(manager: Arc<StoreManager>, options: IdempotencyOptions) -> Self {
        Self {
            manager,
            marker_ttl: options.marker_ttl,
        }
    }

    async fn read(&self, namespace: &str, name: &str) -> CounterResult<i64> {
        let key = keys::counter_key(namespace, name);
        let value = self
            .manager
            .execute(move |conn| {
                let key = key.clone();
                async move {
                    let raw = conn.get(&key).await?;
                    parse_stored(&key, raw)
                }
            })
            .await?;
        Ok(value)
    }

    async fn increment(&self, namespace: &str, name: &str, delta: i64) -> CounterResult<i64> {
        let key = keys::counter_key(namespace, name);
        let value = self
            .manager
            .execute(move |conn| {
                let key = key.clone();
                async move { conn.incr_by(&key, delta).await }
            })
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl AsyncCounter for BestEffortCounter {
    async fn add(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()> {
        validate(namespace, name)?;
        if !idempotency::claim(&self.manager, namespace, name, token, self.marker_ttl).await? {
            return Ok(());
        }
        self.increment(namespace, name, delta).await?;
        Ok(())
    }

    async fn add_and_get(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<CounterReading> {
        validate(namespace, name)?;
        if !idempotency::claim(&self.manager, namespace, name, token, self.marker_ttl).await? {
            // Marker hit: the delta was applied by an earlier attempt.
            let current = self.read(namespace, name).await?;
            return Ok(CounterReading::now(current, Consistency::BestEffort, token));
        }
        let value = self.increment(namespace, name, delta).await?;
        Ok(CounterReading::now(value, Consistency::BestEffort, token))
    }

    async fn get(&self, namespace: &str, name: &str) -> CounterResult<CounterReading> {
        validate(namespace, name)?;
        let value = self.read(namespace, name).await?;
        Ok(CounterReading::now(value, Consistency::BestEffort, None))
    }

    async fn clear(
        &self,
        namespace: &str,
        name: &str,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()> {
        validate(namespace, name)?;
        if !idempotency::claim(&self.manager, namespace, name, token, self.marker_ttl).await? {
            return Ok(());
        }
        let key = keys::counter_key(namespace, name);
        self.manager
            .execute(move |conn| {
                let key = key.clone();
                async move { conn.set(&key, "0").await }
            })
            .await?;
        Ok(())
    }

    fn consistency(&self) -> Consistency {
        Consistency::BestEffort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::StoreConfig;

    async fn counter(store: &MemoryStore) -> BestEffortCounter {
        let manager = Arc::new(
            StoreManager::with_factory(Arc::new(store.connector()), StoreConfig::default()).await,
        );
        BestEffortCounter::new(manager)
    }

    #[tokio::test]
    async fn test_add_and_get_returns_post_increment_value() {
        let store = MemoryStore::new();
        let counter = counter(&store).await;

        let reading = counter.add_and_get("orders", "count", 5, None).await.unwrap();
        assert_eq!(reading.value, 5);
        assert_eq!(reading.consistency, Consistency::BestEffort);

        let reading = counter.add_and_get("orders", "count", -2, None).await.unwrap();
        assert_eq!(reading.value, 3);

        let reading = counter.get("orders", "count").await.unwrap();
        assert_eq!(reading.value, 3);
    }

    #[tokio::test]
    async fn test_get_on_missing_counter_is_zero() {
        let store = MemoryStore::new();
        let counter = counter(&store).await;
        assert_eq!(counter.get("orders", "none").await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn test_duplicate_token_returns_current_value() {
        let store = MemoryStore::new();
        let counter = counter(&store).await;
        let token = IdempotencyToken::generate();

        let first = counter
            .add_and_get("orders", "count", 10, Some(&token))
            .await
            .unwrap();
        assert_eq!(first.value, 10);

        let second = counter
            .add_and_get("orders", "count", 10, Some(&token))
            .await
            .unwrap();
        assert_eq!(second.value, 10);

        assert_eq!(counter.get("orders", "count").await.unwrap().value, 10);
    }

    #[tokio::test]
    async fn test_zero_delta_still_claims_marker() {
        let store = MemoryStore::new();
        let counter = counter(&store).await;
        let token = IdempotencyToken::generate();

        counter.add("orders", "count", 0, Some(&token)).await.unwrap();
        // The marker exists, so a retry with a different delta is suppressed.
        counter.add("orders", "count", 99, Some(&token)).await.unwrap();
        assert_eq!(counter.get("orders", "count").await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn test_clear_resets_and_is_idempotent() {
        let store = MemoryStore::new();
        let counter = counter(&store).await;
        let token = IdempotencyToken::generate();

        counter.add("orders", "count", 7, None).await.unwrap();
        counter.clear("orders", "count", Some(&token)).await.unwrap();
        assert_eq!(counter.get("orders", "count").await.unwrap().value, 0);

        counter.add("orders", "count", 4, None).await.unwrap();
        // Same token: the retried clear is a no-op.
        counter.clear("orders", "count", Some(&token)).await.unwrap();
        assert_eq!(counter.get("orders", "count").await.unwrap().value, 4);
    }

    #[tokio::test]
    async fn test_invalid_names_never_reach_the_store() {
        let store = MemoryStore::new();
        let counter = counter(&store).await;

        assert!(counter.get("", "count").await.is_err());
        assert!(counter.add("orders", "a:b", 1, None).await.is_err());
        assert!(store.is_empty());
    }
}
