//! In-process backing store.
//!
//! Implements the full [`StoreConnection`] surface over a shared concurrent
//! map, including marker TTLs and glob scans. Backs the integration suite and
//! local development without a live Redis; also provides the fault-injection
//! hook the resilience tests drive the breaker with.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::store::connection::{ConnectionFactory, StoreConnection};
use crate::store::{Result, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: DashMap<String, Entry>,
    injected_failures: AtomicUsize,
    // Open scan cursors: token -> last key handed out. Keyed by key rather
    // than index so deletions between pages never skip surviving keys.
    scan_cursors: DashMap<u64, String>,
    next_cursor: AtomicU64,
}

/// A shared in-process key/value store.
///
/// Cloning yields handles onto the same data; [`MemoryStore::connector`]
/// plugs it into the pool wherever a [`RedisConnector`] would go.
///
/// [`RedisConnector`]: crate::store::connection::RedisConnector
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection onto this store.
    pub fn connection(&self) -> Arc<dyn StoreConnection> {
        Arc::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        })
    }

    /// A factory producing connections onto this store.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
        }
    }

    /// Make the next `count` commands fail with a command error.
    pub fn inject_failures(&self, count: usize) {
        self.inner.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of live keys, expiry applied.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|entry| !entry.value().expired())
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`ConnectionFactory`] over a [`MemoryStore`].
pub struct MemoryConnector {
    store: MemoryStore,
}

#[async_trait]
impl ConnectionFactory for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>> {
        Ok(self.store.connection())
    }
}

/// One connection onto a [`MemoryStore`].
pub struct MemoryConnection {
    inner: Arc<MemoryInner>,
}

impl MemoryConnection {
    fn check_injected(&self) -> Result<()> {
        let remaining = &self.inner.injected_failures;
        let mut current = remaining.load(Ordering::SeqCst);
        while current > 0 {
            match remaining.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(StoreError::Command("injected failure".to_string())),
                Err(observed) => current = observed,
            }
        }
        Ok(())
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let entry = self.inner.entries.get(key)?.clone();
        if entry.expired() {
            self.inner.entries.remove(key);
            return None;
        }
        Some(entry)
    }

    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|entry| !entry.value().expired())
            .map(|entry| entry.key().clone())
            .filter(|key| glob_match(pattern, key))
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn ping(&self) -> Result<()> {
        self.check_injected()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_injected()?;
        match self.live(key) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text)),
            Some(_) => Err(StoreError::Command(format!(
                "key '{key}' holds a hash, not a string"
            ))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_injected()?;
        self.inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_injected()?;
        if self.live(key).is_some() {
            return Ok(false);
        }
        self.inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check_injected()?;
        self.inner.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_injected()?;
        Ok(self.live(key).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check_injected()?;
        let mut slot = self.inner.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Text("0".to_string()),
            expires_at: None,
        });
        if slot.expired() {
            *slot = Entry {
                value: Value::Text("0".to_string()),
                expires_at: None,
            };
        }
        match &mut slot.value {
            Value::Text(text) => {
                let current: i64 = text
                    .parse()
                    .map_err(|_| StoreError::Command(format!("key '{key}' is not an integer")))?;
                let next = current + delta;
                *text = next.to_string();
                Ok(next)
            }
            Value::Hash(_) => Err(StoreError::Command(format!(
                "key '{key}' holds a hash, not a string"
            ))),
        }
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.check_injected()?;
        let mut slot = self.inner.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        if slot.expired() {
            *slot = Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            };
        }
        match &mut slot.value {
            Value::Hash(fields) => {
                let current: i64 = fields
                    .get(field)
                    .map(|value| {
                        value.parse().map_err(|_| {
                            StoreError::Command(format!("field '{field}' is not an integer"))
                        })
                    })
                    .transpose()?
                    .unwrap_or(0);
                let next = current + delta;
                fields.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            Value::Text(_) => Err(StoreError::Command(format!(
                "key '{key}' holds a string, not a hash"
            ))),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check_injected()?;
        match self.live(key) {
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields),
            Some(_) => Err(StoreError::Command(format!(
                "key '{key}' holds a string, not a hash"
            ))),
            None => Ok(HashMap::new()),
        }
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<()> {
        self.check_injected()?;
        if let Some(mut slot) = self.inner.entries.get_mut(key) {
            if let Value::Hash(existing) = &mut slot.value {
                for field in fields {
                    existing.remove(field);
                }
                if existing.is_empty() {
                    drop(slot);
                    self.inner.entries.remove(key);
                }
            }
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_injected()?;
        Ok(self.matching_keys(pattern))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.check_injected()?;
        let after = if cursor == 0 {
            None
        } else {
            match self.inner.scan_cursors.remove(&cursor) {
                Some((_, key)) => Some(key),
                // Unknown cursor: the scan it belonged to is finished.
                None => return Ok((0, Vec::new())),
            }
        };

        let keys = self.matching_keys(pattern);
        let remaining: Vec<String> = keys
            .into_iter()
            .filter(|key| after.as_ref().map_or(true, |last| key > last))
            .collect();

        let take = count.max(1).min(remaining.len());
        let page = remaining[..take].to_vec();
        if take < remaining.len() {
            let token = self.inner.next_cursor.fetch_add(1, Ordering::Relaxed) + 1;
            self.inner
                .scan_cursors
                .insert(token, page.last().cloned().unwrap_or_default());
            Ok((token, page))
        } else {
            Ok((0, page))
        }
    }
}

/// Redis-style glob matching: `*` any run, `?` any single character.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], text)
                    || (!text.is_empty() && inner(pattern, &text[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => inner(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}
