//! Blocking surface over the async counter engine.
//!
//! One adapter serves all three strategies: each call is driven to
//! completion on the caller's thread against the runtime the adapter was
//! built with. Callers already inside a runtime are shunted through
//! `block_in_place` so worker threads keep making progress.

use std::future::Future;
use std::sync::Arc;

use crate::counter::{AsyncCounter, BlockingCounter, Consistency, CounterReading, CounterResult};
use crate::token::IdempotencyToken;

/// [`BlockingCounter`] facade over any [`AsyncCounter`].
pub struct BlockingCounterAdapter {
    inner: Arc<dyn AsyncCounter>,
    runtime: tokio::runtime::Handle,
}

impl BlockingCounterAdapter {
    /// Wrap an async strategy.
    pub fn new(inner: Arc<dyn AsyncCounter>, runtime: tokio::runtime::Handle) -> Self {
        Self { inner, runtime }
    }

    fn drive<F: Future>(&self, fut: F) -> F::Output {
        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| self.runtime.block_on(fut))
        } else {
            self.runtime.block_on(fut)
        }
    }
}

impl BlockingCounter for BlockingCounterAdapter {
    fn add(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()> {
        self.drive(self.inner.add(namespace, name, delta, token))
    }

    fn add_and_get(
        &self,
        namespace: &str,
        name: &str,
        delta: i64,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<CounterReading> {
        self.drive(self.inner.add_and_get(namespace, name, delta, token))
    }

    fn get(&self, namespace: &str, name: &str) -> CounterResult<CounterReading> {
        self.drive(self.inner.get(namespace, name))
    }

    fn clear(
        &self,
        namespace: &str,
        name: &str,
        token: Option<&IdempotencyToken>,
    ) -> CounterResult<()> {
        self.drive(self.inner.clear(namespace, name, token))
    }

    fn consistency(&self) -> Consistency {
        self.inner.consistency()
    }
}
