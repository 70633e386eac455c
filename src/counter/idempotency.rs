//! The idempotency marker protocol shared by all strategies.
//!
//! A marker is a presence-only entity keyed by `(namespace, counter, token)`.
//! Claiming is one atomic `SET NX EX`: the caller that creates the marker
//! owns the mutation; everyone else observes it as already applied. Markers
//! expire on their own after the configured TTL — `clear` never erases them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::counter::{CounterError, CounterResult};
use crate::keys;
use crate::store::StoreManager;
use crate::token::IdempotencyToken;

/// Value stored under a marker key.
pub(crate) const MARKER_VALUE: &str = "1";

/// Idempotency behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyOptions {
    /// How long markers live. Must comfortably exceed the longest client
    /// retry window.
    pub marker_ttl: Duration,
}

impl Default for IdempotencyOptions {
    fn default() -> Self {
        Self {
            marker_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Claim the marker for a tokenless or tokened mutation.
///
/// Returns `true` when the mutation should be applied: either no token was
/// supplied, or this call created the marker. `false` means the marker
/// already existed and the mutation must be suppressed.
pub(crate) async fn claim(
    manager: &Arc<StoreManager>,
    namespace: &str,
    name: &str,
    token: Option<&IdempotencyToken>,
    ttl: Duration,
) -> CounterResult<bool> {
    let Some(token) = token else {
        return Ok(true);
    };
    let key = keys::idempotency_key(namespace, name, &token.to_string());
    let owned = manager
        .execute(move |conn| {
            let key = key.clone();
            async move { conn.set_nx_ex(&key, MARKER_VALUE, ttl).await }
        })
        .await
        .map_err(CounterError::from)?;
    if !owned {
        tracing::debug!(namespace, counter = name, token = %token, "duplicate mutation suppressed");
    }
    Ok(owned)
}
