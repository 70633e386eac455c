//! Strategy construction.
//!
//! The factory maps a [`Consistency`] and an execution surface to one of the
//! six concrete counter variants. The per-node strategies require a node id;
//! construction fails without one. Unsupported consistency names are
//! rejected where strings are parsed ([`Consistency::from_str`]), so only
//! the three known levels reach this point.
//!
//! [`Consistency::from_str`]: std::str::FromStr

use std::sync::Arc;
use std::time::Duration;

use crate::counter::accurate::AccurateCounter;
use crate::counter::best_effort::BestEffortCounter;
use crate::counter::blocking::BlockingCounterAdapter;
use crate::counter::eventual::{DeltaLayout, EventualCounter};
use crate::counter::idempotency::IdempotencyOptions;
use crate::counter::{AsyncCounter, BlockingCounter, ConfigError, Consistency};
use crate::store::StoreManager;

/// A constructed counter, carrying which surface it exposes.
///
/// This is what callers that defer the blocking/non-blocking choice hold;
/// the rollup factory picks its scheduler flavor from the variant.
pub enum CounterHandle {
    /// Non-blocking strategy
    Async(Arc<dyn AsyncCounter>),
    /// Blocking facade over a strategy
    Blocking(Arc<dyn BlockingCounter>),
}

impl CounterHandle {
    /// The consistency the underlying strategy tags readings with.
    pub fn consistency(&self) -> Consistency {
        match self {
            CounterHandle::Async(counter) => counter.consistency(),
            CounterHandle::Blocking(counter) => counter.consistency(),
        }
    }
}

/// Builds counter strategies over one store manager.
pub struct CounterFactory {
    manager: Arc<StoreManager>,
    node_id: Option<String>,
    layout: DeltaLayout,
    idempotency: IdempotencyOptions,
}

impl CounterFactory {
    /// Create a factory; per-node strategies additionally need
    /// [`with_node_id`].
    ///
    /// [`with_node_id`]: CounterFactory::with_node_id
    pub fn new(manager: Arc<StoreManager>) -> Self {
        Self {
            manager,
            node_id: None,
            layout: DeltaLayout::Hash,
            idempotency: IdempotencyOptions::default(),
        }
    }

    /// Identity of this writer; required for the eventually-consistent and
    /// accurate strategies.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Delta layout for the eventually-consistent strategy.
    pub fn with_layout(mut self, layout: DeltaLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Idempotency marker TTL.
    pub fn with_marker_ttl(mut self, marker_ttl: Duration) -> Self {
        self.idempotency = IdempotencyOptions { marker_ttl };
        self
    }

    /// Construct the non-blocking variant of a strategy.
    pub fn create(&self, consistency: Consistency) -> Result<Arc<dyn AsyncCounter>, ConfigError> {
        let manager = Arc::clone(&self.manager);
        let options = self.idempotency.clone();
        match consistency {
            Consistency::BestEffort => Ok(Arc::new(BestEffortCounter::with_options(
                manager, options,
            ))),
            Consistency::EventuallyConsistent => {
                let node_id = self.require_node_id(consistency)?;
                Ok(Arc::new(EventualCounter::with_layout(
                    manager,
                    node_id,
                    self.layout,
                    options,
                )))
            }
            Consistency::Accurate => {
                let node_id = self.require_node_id(consistency)?;
                Ok(Arc::new(AccurateCounter::with_options(
                    manager, node_id, options,
                )))
            }
        }
    }

    /// Construct the blocking variant of a strategy.
    pub fn create_blocking(
        &self,
        consistency: Consistency,
        runtime: tokio::runtime::Handle,
    ) -> Result<Arc<dyn BlockingCounter>, ConfigError> {
        let inner = self.create(consistency)?;
        Ok(Arc::new(BlockingCounterAdapter::new(inner, runtime)))
    }

    /// Construct a handle for callers deferring the surface choice.
    pub fn create_handle(
        &self,
        consistency: Consistency,
        blocking: bool,
        runtime: tokio::runtime::Handle,
    ) -> Result<CounterHandle, ConfigError> {
        if blocking {
            Ok(CounterHandle::Blocking(
                self.create_blocking(consistency, runtime)?,
            ))
        } else {
            Ok(CounterHandle::Async(self.create(consistency)?))
        }
    }

    fn require_node_id(&self, consistency: Consistency) -> Result<String, ConfigError> {
        self.node_id
            .clone()
            .ok_or(ConfigError::MissingNodeId(consistency))
    }
}
