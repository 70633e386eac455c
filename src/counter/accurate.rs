//! Accurate strategy: per-node deltas reconciled into a snapshot on every
//! read and write.
//!
//! The counter's authoritative value lives under `counter:{ns}:{c}:snapshot`;
//! pending per-node increments live in the `…:deltas` hash. Reconciliation
//! folds the hash into the snapshot and stamps `…:snapshot:lastSnapshotTs`,
//! so every reading reflects all deltas visible at that instant.
//!
//! Reconciliation converges rather than serializes: the snapshot is only
//! ever moved by increments (concurrent reconcilers commute), and only the
//! fields actually summed are deleted, so a node's increment landing between
//! the hash read and the field delete of a different field survives for the
//! next pass.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::counter::idempotency::{self, IdempotencyOptions};
use crate::counter::{
    parse_stored, validate, AsyncCounter, Consistency, CounterReading, CounterResult,
};
use crate::keys;
use crate::store::{StoreConnection, StoreError, StoreManager};
use crate::token::IdempotencyToken;

/// Snapshot-reconciled counter.
pub struct AccurateCounter {
    manager: Arc<StoreManager>,
    node_id: String,
    marker_ttl: Duration,
}

impl AccurateCounter {
    /// Create an accurate counter with default idempotency options.
    pub fn new(manager: Arc<StoreManager>, node_id: impl Into<String>) -> Self {
        Self::with_options(manager, node_id, IdempotencyOptions::default())
    }

    /// Create an accurate counter with explicit idempotency options.
    pub fn with_options(
        manager: Arc<StoreManager>,
        node_id: impl Into<String>,
        options: IdempotencyOptions,
    ) -> Self {
        Self {
            manager,
            node_id: node_id.into(),
            marker_ttl: options.marker_ttl,
        }
    }

    /// Fold pending deltas into the snapshot and return its value.
    async fn reconcile(&self, namespace: &str, name: &str) -> CounterResult<i64> {
        let snapshot_key = keys::snapshot_key(namespace, name);
        let deltas_key = keys::delta_hash_key(namespace, name);
        let ts_key = keys::snapshot_ts_key(namespace, name);
        let value = self
            .manager
            .execute(move |conn| {
                let snapshot_key = snapshot_key.clone();
                let deltas_key = deltas_key.clone();
                let ts_key = ts_key.clone();
                async move {
                    reconcile_on(&*conn, &snapshot_key, &deltas_key, &ts_key).await
                }
            })
            .await?;
        Ok(value)
    }

    async fn write_delta(&self, namespace: &str, name: &str, delta: i64) -> CounterResult<()> {
        let deltas_key = keys::delta_hash_key(namespace, name);
        let node = self.node_id.clone();
        self.manager
            .execute(move |conn| {
                let deltas_key = deltas_key.clone();
                let node = node.clone();
                async move {
                    conn.hincr_by(&deltas_key, &node, delta).await?;
                    Ok(())
                }
            })
            .await?;
        Ok(())
    }
}

/// One reconciliation pass over a borrowed connection.
async fn reconcile_on(
    conn: &dyn StoreConnection,
    snapshot_key: &str,
    deltas_key: &str,
    ts_key: &str,
) -> Result<i64, StoreError> {
    let fields = conn.hget_all(deltas_key).await?;
    if fields.is_empty() {
        return parse_stored(snapshot_key, conn.get(snapshot_key).await?);
    }

    let mut sum = 0i64;
    let mut summed = Vec::with_capacity(fields.len());
    for (node, raw) in fields {
        let value: i64 = raw.parse().map_err(|_| {
            StoreError::Command(format!(
                "delta field '{node}' of '{deltas_key}' is not an integer"
            ))
        })?;
        sum += value;
        summed.push(node);
    }

    let snapshot = if sum != 0 {
        let folded = conn.incr_by(snapshot_key, sum).await?;
        conn.set(ts_key, &Utc::now().timestamp_millis().to_string())
            .await?;
        folded
    } else {
        parse_stored(snapshot_key, conn.get(snapshot_key).await?)?
    };

    conn.hdel(deltas_key, &summed).await?;
    Ok(snapshot)
}

#[async_trait]
impl AsyncCounter for AccurateCounter {
    async fn add(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()> {
        validate(namespace, name)?;
        if idempotency::claim(&self.manager, namespace, name, token, self.marker_ttl).await? {
            self.write_delta(namespace, name, delta).await?;
        }
        self.reconcile(namespace, name).await?;
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
        if idempotency::claim(&self.manager, namespace, name, token, self.marker_ttl).await? {
            self.write_delta(namespace, name, delta).await?;
        }
        let value = self.reconcile(namespace, name).await?;
        Ok(CounterReading::now(value, Consistency::Accurate, token))
    }

    async fn get(&self, namespace: &str, name: &str) -> CounterResult<CounterReading> {
        validate(namespace, name)?;
        let value = self.reconcile(namespace, name).await?;
        Ok(CounterReading::now(value, Consistency::Accurate, None))
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
        let snapshot_key = keys::snapshot_key(namespace, name);
        let deltas_key = keys::delta_hash_key(namespace, name);
        self.manager
            .execute(move |conn| {
                let snapshot_key = snapshot_key.clone();
                let deltas_key = deltas_key.clone();
                async move {
                    conn.set(&snapshot_key, "0").await?;
                    conn.del(&deltas_key).await
                }
            })
            .await?;
        Ok(())
    }

    fn consistency(&self) -> Consistency {
        Consistency::Accurate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::StoreConfig;

    async fn node(store: &MemoryStore, node_id: &str) -> AccurateCounter {
        let manager = Arc::new(
            StoreManager::with_factory(Arc::new(store.connector()), StoreConfig::default()).await,
        );
        AccurateCounter::new(manager, node_id)
    }

    #[tokio::test]
    async fn test_read_reconciles_all_nodes() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a").await;
        let b = node(&store, "node-b").await;

        a.add("orders", "count", 5, None).await.unwrap();
        b.add("orders", "count", 6, None).await.unwrap();

        let reading = a.get("orders", "count").await.unwrap();
        assert_eq!(reading.value, 11);
        assert_eq!(reading.consistency, Consistency::Accurate);

        // Reconciliation folded everything into the snapshot.
        let conn = store.connection();
        assert_eq!(
            conn.get("counter:orders:count:snapshot").await.unwrap(),
            Some("11".to_string())
        );
        assert!(conn
            .hget_all("counter:orders:count:deltas")
            .await
            .unwrap()
            .is_empty());
        assert!(conn
            .exists("counter:orders:count:snapshot:lastSnapshotTs")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_repeated_get_is_stable() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a").await;

        a.add("orders", "count", 9, None).await.unwrap();
        let first = a.get("orders", "count").await.unwrap().value;
        let second = a.get("orders", "count").await.unwrap().value;
        assert_eq!(first, 9);
        assert_eq!(second, 9);
    }

    #[tokio::test]
    async fn test_add_and_get_includes_own_delta() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a").await;

        let reading = a.add_and_get("orders", "count", 5, None).await.unwrap();
        assert_eq!(reading.value, 5);
        let reading = a.add_and_get("orders", "count", -3, None).await.unwrap();
        assert_eq!(reading.value, 2);
    }

    #[tokio::test]
    async fn test_duplicate_token_still_reconciles() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a").await;
        let token = IdempotencyToken::generate();

        let first = a.add_and_get("orders", "count", 10, Some(&token)).await.unwrap();
        assert_eq!(first.value, 10);
        let second = a.add_and_get("orders", "count", 10, Some(&token)).await.unwrap();
        assert_eq!(second.value, 10);
    }

    #[tokio::test]
    async fn test_clear_resets_snapshot_and_deltas() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a").await;
        let b = node(&store, "node-b").await;

        a.add("orders", "count", 3, None).await.unwrap();
        b.add("orders", "count", 4, None).await.unwrap();
        a.clear("orders", "count", None).await.unwrap();

        assert_eq!(a.get("orders", "count").await.unwrap().value, 0);
        assert!(!store
            .connection()
            .exists("counter:orders:count:deltas")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_zero_sum_deltas_fold_without_snapshot_write() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a").await;

        // Deltas that cancel out, written behind the strategy's back.
        let conn = store.connection();
        conn.hincr_by("counter:orders:count:deltas", "node-a", 5)
            .await
            .unwrap();
        conn.hincr_by("counter:orders:count:deltas", "node-b", -5)
            .await
            .unwrap();

        assert_eq!(a.get("orders", "count").await.unwrap().value, 0);
        // The fields were dropped, but no snapshot or timestamp appeared.
        assert!(conn
            .hget_all("counter:orders:count:deltas")
            .await
            .unwrap()
            .is_empty());
        assert!(!conn
            .exists("counter:orders:count:snapshot:lastSnapshotTs")
            .await
            .unwrap());
    }
}
