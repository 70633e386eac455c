//! One rollup pass over a namespace.

use futures::future::join_all;
use std::sync::Arc;

use crate::counter::parse_stored;
use crate::keys;
use crate::rollup::RollupResult;
use crate::store::StoreManager;

/// Default scan page size; keeps each scan step non-blocking on the store.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// What one sweep saw and did.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Delta entities the scan produced
    pub keys_seen: usize,

    /// Delta entities folded into their totals and removed
    pub folded: usize,

    /// Per-key failures, logged and skipped
    pub errors: usize,
}

/// Folds a namespace's delta accumulators into totals.
pub struct DeltaSweep {
    manager: Arc<StoreManager>,
    namespace: String,
    page_size: usize,
}

impl DeltaSweep {
    /// Create a sweep over one namespace.
    pub fn new(manager: Arc<StoreManager>, namespace: impl Into<String>) -> Self {
        Self::with_page_size(manager, namespace, DEFAULT_PAGE_SIZE)
    }

    /// Create a sweep with an explicit scan page size.
    pub fn with_page_size(
        manager: Arc<StoreManager>,
        namespace: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            manager,
            namespace: namespace.into(),
            page_size: page_size.max(1),
        }
    }

    /// The namespace this sweep covers.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run one full pass: cursor-scan the namespace's delta entities and
    /// fold each into its counter's total.
    ///
    /// Per-key rollups within a page run pipelined; the cursor only advances
    /// once the whole page has resolved. Per-key failures are logged and
    /// counted, never fatal for the pass.
    pub async fn run_once(&self) -> RollupResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut cursor = 0u64;

        loop {
            let pattern = keys::namespace_deltas_pattern(&self.namespace);
            let page_size = self.page_size;
            let (next, page) = self
                .manager
                .execute(move |conn| {
                    let pattern = pattern.clone();
                    async move { conn.scan(cursor, &pattern, page_size).await }
                })
                .await?;

            report.keys_seen += page.len();
            let outcomes = join_all(page.iter().map(|key| self.rollup_key(key))).await;
            for (key, outcome) in page.iter().zip(outcomes) {
                match outcome {
                    Ok(true) => report.folded += 1,
                    Ok(false) => {}
                    Err(err) => {
                        report.errors += 1;
                        tracing::warn!(key, error = %err, "delta rollup failed, skipping key");
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(
            namespace = %self.namespace,
            keys_seen = report.keys_seen,
            folded = report.folded,
            errors = report.errors,
            "rollup sweep finished"
        );
        Ok(report)
    }

    /// Fold one delta entity. Returns whether anything was removed.
    async fn rollup_key(&self, key: &str) -> RollupResult<bool> {
        let Some(counter) = keys::counter_from_delta_key(key) else {
            tracing::warn!(key, "unexpected key shape in delta scan");
            return Ok(false);
        };
        let total_key = keys::total_key(&self.namespace, counter);

        if keys::is_flat_delta_key(key) {
            self.rollup_flat(key.to_string(), total_key).await
        } else {
            self.rollup_hash(key.to_string(), total_key).await
        }
    }

    async fn rollup_hash(&self, key: String, total_key: String) -> RollupResult<bool> {
        let folded = self
            .manager
            .execute(move |conn| {
                let key = key.clone();
                let total_key = total_key.clone();
                async move {
                    let fields = conn.hget_all(&key).await?;
                    if fields.is_empty() {
                        return Ok(false);
                    }
                    let mut sum = 0i64;
                    let mut summed = Vec::with_capacity(fields.len());
                    for (node, raw) in fields {
                        sum += parse_stored(&key, Some(raw))?;
                        summed.push(node);
                    }
                    if sum != 0 {
                        conn.incr_by(&total_key, sum).await?;
                    }
                    conn.hdel(&key, &summed).await?;
                    Ok(true)
                }
            })
            .await?;
        Ok(folded)
    }

    async fn rollup_flat(&self, key: String, total_key: String) -> RollupResult<bool> {
        let folded = self
            .manager
            .execute(move |conn| {
                let key = key.clone();
                let total_key = total_key.clone();
                async move {
                    let value = match conn.get(&key).await? {
                        None => return Ok(false),
                        Some(raw) => parse_stored(&key, Some(raw))?,
                    };
                    if value != 0 {
                        conn.incr_by(&total_key, value).await?;
                    }
                    conn.del(&key).await?;
                    Ok(true)
                }
            })
            .await?;
        Ok(folded)
    }
}
