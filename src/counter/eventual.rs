//! Eventually-consistent strategy: per-node deltas plus a consolidated total.
//!
//! Each node accumulates its own pending increments, so writers never
//! contend; the periodic rollup folds deltas into `counter:{ns}:{c}:total`.
//! A read observes `total + Σ deltas`, which converges once writers quiesce
//! and the rollup runs.
//!
//! Two delta layouts exist. The hash layout keeps one map keyed by node id
//! and reads it with a single `HGETALL`; preferred for small node counts.
//! The flat layout gives every node its own key and pattern-scans them on
//! each read; kept for deployments that still carry that key shape.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::counter::idempotency::{self, IdempotencyOptions};
use crate::counter::{
    parse_stored, validate, AsyncCounter, Consistency, CounterReading, CounterResult,
};
use crate::keys;
use crate::store::{StoreError, StoreManager};
use crate::token::IdempotencyToken;

/// Page size for flat-layout scans; keeps each scan step non-blocking on the
/// store.
const SCAN_PAGE: usize = 200;

/// How a counter's per-node deltas are laid out in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaLayout {
    /// One hash per counter, field per node. Preferred.
    Hash,
    /// One key per node. Legacy; reads require a pattern scan.
    Flat,
}

/// Per-node delta counter with rollup-consolidated totals.
pub struct EventualCounter {
    manager: Arc<StoreManager>,
    node_id: String,
    layout: DeltaLayout,
    marker_ttl: Duration,
}

impl EventualCounter {
    /// Create an eventually-consistent counter using the hash layout.
    pub fn new(manager: Arc<StoreManager>, node_id: impl Into<String>) -> Self {
        Self::with_layout(manager, node_id, DeltaLayout::Hash, IdempotencyOptions::default())
    }

    /// Create an eventually-consistent counter with an explicit layout.
    pub fn with_layout(
        manager: Arc<StoreManager>,
        node_id: impl Into<String>,
        layout: DeltaLayout,
        options: IdempotencyOptions,
    ) -> Self {
        Self {
            manager,
            node_id: node_id.into(),
            layout,
            marker_ttl: options.marker_ttl,
        }
    }

    /// The delta layout this counter writes.
    pub fn layout(&self) -> DeltaLayout {
        self.layout
    }

    async fn write_delta(&self, namespace: &str, name: &str, delta: i64) -> CounterResult<()> {
        match self.layout {
            DeltaLayout::Hash => {
                let key = keys::delta_hash_key(namespace, name);
                let node = self.node_id.clone();
                self.manager
                    .execute(move |conn| {
                        let key = key.clone();
                        let node = node.clone();
                        async move {
                            conn.hincr_by(&key, &node, delta).await?;
                            Ok(())
                        }
                    })
                    .await?;
            }
            DeltaLayout::Flat => {
                let key = keys::flat_delta_key(namespace, name, &self.node_id);
                self.manager
                    .execute(move |conn| {
                        let key = key.clone();
                        async move {
                            conn.incr_by(&key, delta).await?;
                            Ok(())
                        }
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn read_value(&self, namespace: &str, name: &str) -> CounterResult<i64> {
        let total_key = keys::total_key(namespace, name);
        match self.layout {
            DeltaLayout::Hash => {
                let hash_key = keys::delta_hash_key(namespace, name);
                let value = self
                    .manager
                    .execute(move |conn| {
                        let total_key = total_key.clone();
                        let hash_key = hash_key.clone();
                        async move {
                            let mut sum = parse_stored(&total_key, conn.get(&total_key).await?)?;
                            for (node, raw) in conn.hget_all(&hash_key).await? {
                                sum += raw.parse::<i64>().map_err(|_| {
                                    StoreError::Command(format!(
                                        "delta field '{node}' of '{hash_key}' is not an integer"
                                    ))
                                })?;
                            }
                            Ok(sum)
                        }
                    })
                    .await?;
                Ok(value)
            }
            DeltaLayout::Flat => {
                let pattern = keys::flat_deltas_pattern(namespace, name);
                let value = self
                    .manager
                    .execute(move |conn| {
                        let total_key = total_key.clone();
                        let pattern = pattern.clone();
                        async move {
                            let mut sum = parse_stored(&total_key, conn.get(&total_key).await?)?;
                            let mut cursor = 0;
                            loop {
                                let (next, page) = conn.scan(cursor, &pattern, SCAN_PAGE).await?;
                                for key in page {
                                    sum += parse_stored(&key, conn.get(&key).await?)?;
                                }
                                if next == 0 {
                                    break;
                                }
                                cursor = next;
                            }
                            Ok(sum)
                        }
                    })
                    .await?;
                Ok(value)
            }
        }
    }

    async fn drop_deltas_and_zero_total(&self, namespace: &str, name: &str) -> CounterResult<()> {
        let total_key = keys::total_key(namespace, name);
        match self.layout {
            DeltaLayout::Hash => {
                let hash_key = keys::delta_hash_key(namespace, name);
                self.manager
                    .execute(move |conn| {
                        let total_key = total_key.clone();
                        let hash_key = hash_key.clone();
                        async move {
                            conn.set(&total_key, "0").await?;
                            conn.del(&hash_key).await
                        }
                    })
                    .await?;
            }
            DeltaLayout::Flat => {
                let pattern = keys::flat_deltas_pattern(namespace, name);
                self.manager
                    .execute(move |conn| {
                        let total_key = total_key.clone();
                        let pattern = pattern.clone();
                        async move {
                            conn.set(&total_key, "0").await?;
                            // Deletions shrink the match set, so each pass
                            // restarts the scan until nothing matches.
                            loop {
                                let (next, page) = conn.scan(0, &pattern, SCAN_PAGE).await?;
                                for key in &page {
                                    conn.del(key).await?;
                                }
                                if next == 0 || page.is_empty() {
                                    break;
                                }
                            }
                            Ok(())
                        }
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncCounter for EventualCounter {
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
        self.write_delta(namespace, name, delta).await
    }

    /// `add` followed by `get`: the returned value reflects every delta
    /// visible at read time, not just this caller's. Callers that need
    /// "value after my write" want the accurate strategy.
    async fn add_and_get(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<CounterReading> {
        self.add(namespace, name, delta, token).await?;
        let value = self.read_value(namespace, name).await?;
        Ok(CounterReading::now(
            value,
            Consistency::EventuallyConsistent,
            token,
        ))
    }

    async fn get(&self, namespace: &str, name: &str) -> CounterResult<CounterReading> {
        validate(namespace, name)?;
        let value = self.read_value(namespace, name).await?;
        Ok(CounterReading::now(
            value,
            Consistency::EventuallyConsistent,
            None,
        ))
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
        self.drop_deltas_and_zero_total(namespace, name).await
    }

    fn consistency(&self) -> Consistency {
        Consistency::EventuallyConsistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::StoreConfig;

    async fn node(store: &MemoryStore, node_id: &str, layout: DeltaLayout) -> EventualCounter {
        let manager = Arc::new(
            StoreManager::with_factory(Arc::new(store.connector()), StoreConfig::default()).await,
        );
        EventualCounter::with_layout(manager, node_id, layout, IdempotencyOptions::default())
    }

    #[tokio::test]
    async fn test_two_nodes_sum_hash_layout() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a", DeltaLayout::Hash).await;
        let b = node(&store, "node-b", DeltaLayout::Hash).await;

        a.add("orders", "count", 3, None).await.unwrap();
        b.add("orders", "count", 4, None).await.unwrap();

        assert_eq!(a.get("orders", "count").await.unwrap().value, 7);
        assert_eq!(b.get("orders", "count").await.unwrap().value, 7);
    }

    #[tokio::test]
    async fn test_two_nodes_sum_flat_layout() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a", DeltaLayout::Flat).await;
        let b = node(&store, "node-b", DeltaLayout::Flat).await;

        a.add("orders", "count", 3, None).await.unwrap();
        b.add("orders", "count", 4, None).await.unwrap();

        assert_eq!(b.get("orders", "count").await.unwrap().value, 7);
    }

    #[tokio::test]
    async fn test_read_includes_consolidated_total() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a", DeltaLayout::Hash).await;

        // A previous rollup left a total behind.
        store
            .connection()
            .set("counter:orders:count:total", "10")
            .await
            .unwrap();
        a.add("orders", "count", 5, None).await.unwrap();

        assert_eq!(a.get("orders", "count").await.unwrap().value, 15);
    }

    #[tokio::test]
    async fn test_add_and_get_observes_concurrent_writers() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a", DeltaLayout::Hash).await;
        let b = node(&store, "node-b", DeltaLayout::Hash).await;

        b.add("orders", "count", 100, None).await.unwrap();
        let reading = a.add_and_get("orders", "count", 1, None).await.unwrap();
        // Not 1: the reading folds in node-b's delta.
        assert_eq!(reading.value, 101);
        assert_eq!(reading.consistency, Consistency::EventuallyConsistent);
    }

    #[tokio::test]
    async fn test_duplicate_token_suppressed() {
        let store = MemoryStore::new();
        let a = node(&store, "node-a", DeltaLayout::Hash).await;
        let token = IdempotencyToken::generate();

        a.add("orders", "count", 10, Some(&token)).await.unwrap();
        a.add("orders", "count", 10, Some(&token)).await.unwrap();

        assert_eq!(a.get("orders", "count").await.unwrap().value, 10);
    }

    #[tokio::test]
    async fn test_clear_drops_total_and_deltas() {
        for layout in [DeltaLayout::Hash, DeltaLayout::Flat] {
            let store = MemoryStore::new();
            let a = node(&store, "node-a", layout).await;
            let b = node(&store, "node-b", layout).await;

            a.add("orders", "count", 3, None).await.unwrap();
            b.add("orders", "count", 4, None).await.unwrap();
            a.clear("orders", "count", None).await.unwrap();

            assert_eq!(a.get("orders", "count").await.unwrap().value, 0);
            assert_eq!(b.get("orders", "count").await.unwrap().value, 0);
        }
    }
}
