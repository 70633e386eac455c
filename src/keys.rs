//! Key-space naming for counters, deltas, snapshots, and idempotency markers.
//!
//! Every component derives its backing-store keys from the functions in this
//! module, so writers, readers, and the rollup sweep always agree on the
//! layout. The layout is part of the external contract: monitoring tooling
//! keyed on `counter:{ns}:*` depends on these exact shapes.
//!
//! Namespace and counter name are used verbatim. No normalization, no
//! hashing. The separator `:` is reserved; [`validate_part`] is how entry
//! points reject names that would corrupt the layout.

/// Reserved separator between key segments.
pub const SEPARATOR: char = ':';

/// Prefix for all counter-value entities.
pub const COUNTER_PREFIX: &str = "counter";

/// Prefix for idempotency markers.
pub const IDEMPOTENCY_PREFIX: &str = "idempotency";

/// Key of the single-key (best-effort) counter: `counter:{ns}:{c}`.
pub fn counter_key(namespace: &str, name: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}")
}

/// Key of the consolidated total: `counter:{ns}:{c}:total`.
pub fn total_key(namespace: &str, name: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}:total")
}

/// Key of one node's flat delta: `counter:{ns}:{c}:deltas:{node}`.
pub fn flat_delta_key(namespace: &str, name: &str, node_id: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}:deltas:{node_id}")
}

/// Key of the delta hash (field per node): `counter:{ns}:{c}:deltas`.
pub fn delta_hash_key(namespace: &str, name: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}:deltas")
}

/// Key of the accurate strategy's snapshot: `counter:{ns}:{c}:snapshot`.
pub fn snapshot_key(namespace: &str, name: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}:snapshot")
}

/// Key of the snapshot timestamp: `counter:{ns}:{c}:snapshot:lastSnapshotTs`.
pub fn snapshot_ts_key(namespace: &str, name: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}:snapshot:lastSnapshotTs")
}

/// Key of an idempotency marker: `idempotency:{ns}:{c}:{tokenId}`.
pub fn idempotency_key(namespace: &str, name: &str, token_id: &str) -> String {
    format!("{IDEMPOTENCY_PREFIX}:{namespace}:{name}:{token_id}")
}

/// Scan pattern matching every delta entity of a namespace.
///
/// The trailing `*` makes the glob match both the hash accumulator
/// (`counter:{ns}:{c}:deltas`) and legacy flat per-node keys
/// (`counter:{ns}:{c}:deltas:{node}`); the sweep dispatches on key shape.
pub fn namespace_deltas_pattern(namespace: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:*:deltas*")
}

/// Scan pattern matching one counter's flat per-node delta keys.
pub fn flat_deltas_pattern(namespace: &str, name: &str) -> String {
    format!("{COUNTER_PREFIX}:{namespace}:{name}:deltas:*")
}

/// Recover the counter name from a delta key (hash or flat form).
///
/// The counter name is the third `:`-segment. Returns `None` when the key
/// does not have the expected shape.
pub fn counter_from_delta_key(key: &str) -> Option<&str> {
    let mut parts = key.split(SEPARATOR);
    if parts.next() != Some(COUNTER_PREFIX) {
        return None;
    }
    parts.next()?; // namespace
    parts.next()
}

/// Whether a delta key names the flat (per-node) layout.
///
/// Hash accumulators end in `:deltas`; flat keys carry a node suffix.
pub fn is_flat_delta_key(key: &str) -> bool {
    key.contains(":deltas:")
}

/// Validate a namespace or counter-name segment.
///
/// Rejects empty strings and strings containing the reserved separator, so
/// malformed names never reach the backing store.
pub fn validate_part(kind: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{kind} must not be blank"));
    }
    if value.contains(SEPARATOR) {
        return Err(format!("{kind} must not contain '{SEPARATOR}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(counter_key("orders", "count"), "counter:orders:count");
        assert_eq!(total_key("orders", "count"), "counter:orders:count:total");
        assert_eq!(
            flat_delta_key("orders", "count", "node-a"),
            "counter:orders:count:deltas:node-a"
        );
        assert_eq!(
            delta_hash_key("orders", "count"),
            "counter:orders:count:deltas"
        );
        assert_eq!(
            snapshot_key("orders", "count"),
            "counter:orders:count:snapshot"
        );
        assert_eq!(
            snapshot_ts_key("orders", "count"),
            "counter:orders:count:snapshot:lastSnapshotTs"
        );
        assert_eq!(
            idempotency_key("orders", "count", "abc"),
            "idempotency:orders:count:abc"
        );
    }

    #[test]
    fn test_namespace_pattern_covers_both_layouts() {
        let pattern = namespace_deltas_pattern("orders");
        assert_eq!(pattern, "counter:orders:*:deltas*");
    }

    #[test]
    fn test_counter_name_recovery() {
        assert_eq!(
            counter_from_delta_key("counter:orders:count:deltas"),
            Some("count")
        );
        assert_eq!(
            counter_from_delta_key("counter:orders:count:deltas:node-a"),
            Some("count")
        );
        assert_eq!(counter_from_delta_key("idempotency:orders:count:x"), None);
        assert_eq!(counter_from_delta_key("counter:orders"), None);
    }

    #[test]
    fn test_layout_dispatch() {
        assert!(!is_flat_delta_key("counter:orders:count:deltas"));
        assert!(is_flat_delta_key("counter:orders:count:deltas:node-a"));
    }

    #[test]
    fn test_validate_part() {
        assert!(validate_part("namespace", "orders").is_ok());
        assert!(validate_part("namespace", "").is_err());
        assert!(validate_part("namespace", "   ").is_err());
        assert!(validate_part("counter name", "a:b").is_err());
    }
}
