//! # DCounter - Distributed Named Counters
//!
//! A library for maintaining named integer counters shared across many
//! processes and updated concurrently from multiple nodes, backed by a
//! sentinel-discovered Redis primary.
//!
//! ## Architecture
//!
//! - `token`: time-ordered idempotency tokens (UUID v7)
//! - `keys`: the key-space contract shared by writers, readers, and rollups
//! - `store`: pooled, retrying, circuit-broken access to the backing store
//! - `counter`: the three consistency strategies behind one contract
//! - `rollup`: the periodic sweep folding per-node deltas into totals
//!
//! ## Example
//!
//! ```rust,ignore
//! use dcounter::counter::{Consistency, CounterFactory};
//! use dcounter::store::{StoreConfig, StoreManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Arc::new(StoreManager::connect(StoreConfig::default()).await);
//!     let factory = CounterFactory::new(manager).with_node_id("node-a");
//!     let counter = factory.create(Consistency::EventuallyConsistent)?;
//!
//!     counter.add("orders", "count", 5, None).await?;
//!     let reading = counter.get("orders", "count").await?;
//!     println!("orders/count = {}", reading.value);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Idempotency tokens
pub mod token;

// Key-space naming
pub mod keys;

// Backing-store access
pub mod store;

// Counter strategies
pub mod counter;

// Periodic delta rollup
pub mod rollup;

// Re-export commonly used types
pub use counter::{
    AsyncCounter, BlockingCounter, Consistency, CounterError, CounterFactory, CounterReading,
    CounterResult,
};
pub use rollup::{RollupFactory, RollupScheduler};
pub use store::{StoreConfig, StoreError, StoreManager};
pub use token::IdempotencyToken;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
