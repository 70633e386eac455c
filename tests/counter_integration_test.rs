// Integration tests for the counter engine: the three strategies, the
// idempotency protocol, the rollup sweep, and the resilience layer, all
// exercised end-to-end against the in-process backend.

#[cfg(test)]
mod counter_integration_tests {
    use dcounter::counter::{
        Consistency, CounterFactory, DeltaLayout, EventualCounter, IdempotencyOptions,
    };
    use dcounter::rollup::DeltaSweep;
    use dcounter::store::{
        CircuitBreakerConfig, MemoryStore, PoolConfig, RetryConfig, StoreConfig, StoreError,
        StoreManager,
    };
    use dcounter::{AsyncCounter, CounterError, IdempotencyToken};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> StoreConfig {
        StoreConfig {
            pool: PoolConfig {
                max_total: 8,
                max_idle: 8,
                min_idle: 0,
                max_wait: Duration::from_millis(200),
                test_on_borrow: false,
                test_on_return: false,
            },
            retry: RetryConfig {
                max_attempts: 2,
                wait_between: Duration::from_millis(1),
            },
            circuit_breaker: CircuitBreakerConfig {
                window_size: 10,
                open_duration: Duration::from_millis(60),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn manager(store: &MemoryStore) -> Arc<StoreManager> {
        Arc::new(StoreManager::with_factory(Arc::new(store.connector()), fast_config()).await)
    }

    #[tokio::test]
    async fn test_best_effort_add_sequence() {
        let store = MemoryStore::new();
        let factory = CounterFactory::new(manager(&store).await);
        let counter = factory.create(Consistency::BestEffort).unwrap();

        let reading = counter.add_and_get("orders", "count", 5, None).await.unwrap();
        assert_eq!(reading.value, 5);
        assert_eq!(reading.consistency, Consistency::BestEffort);

        let reading = counter.add_and_get("orders", "count", -2, None).await.unwrap();
        assert_eq!(reading.value, 3);

        assert_eq!(counter.get("orders", "count").await.unwrap().value, 3);
    }

    #[tokio::test]
    async fn test_idempotent_retry_applies_once() {
        let store = MemoryStore::new();
        let factory = CounterFactory::new(manager(&store).await);
        let counter = factory.create(Consistency::BestEffort).unwrap();
        let token = IdempotencyToken::generate();

        let first = counter
            .add_and_get("orders", "count", 10, Some(&token))
            .await
            .unwrap();
        assert_eq!(first.value, 10);
        assert_eq!(first.token.as_ref().map(|t| t.id()), Some(token.id()));

        let retried = counter
            .add_and_get("orders", "count", 10, Some(&token))
            .await
            .unwrap();
        assert_eq!(retried.value, 10);

        assert_eq!(counter.get("orders", "count").await.unwrap().value, 10);
    }

    #[tokio::test]
    async fn test_eventually_consistent_two_nodes_and_rollup() {
        for layout in [DeltaLayout::Hash, DeltaLayout::Flat] {
            let store = MemoryStore::new();
            let shared = manager(&store).await;
            let node_a = EventualCounter::with_layout(
                Arc::clone(&shared),
                "node-a",
                layout,
                IdempotencyOptions::default(),
            );
            let node_b = EventualCounter::with_layout(
                Arc::clone(&shared),
                "node-b",
                layout,
                IdempotencyOptions::default(),
            );

            node_a.add("orders", "count", 3, None).await.unwrap();
            node_b.add("orders", "count", 4, None).await.unwrap();

            assert_eq!(node_a.get("orders", "count").await.unwrap().value, 7);
            assert_eq!(node_b.get("orders", "count").await.unwrap().value, 7);

            DeltaSweep::new(Arc::clone(&shared), "orders")
                .run_once()
                .await
                .unwrap();

            let conn = store.connection();
            assert_eq!(
                conn.get("counter:orders:count:total").await.unwrap(),
                Some("7".to_string())
            );
            assert!(!conn.exists("counter:orders:count:deltas").await.unwrap());
            assert!(!conn
                .exists("counter:orders:count:deltas:node-a")
                .await
                .unwrap());

            // The consolidated value reads the same.
            assert_eq!(node_a.get("orders", "count").await.unwrap().value, 7);
        }
    }

    #[tokio::test]
    async fn test_accurate_read_reconciles_across_nodes() {
        let store = MemoryStore::new();
        let shared = manager(&store).await;
        let node_a = CounterFactory::new(Arc::clone(&shared))
            .with_node_id("node-a")
            .create(Consistency::Accurate)
            .unwrap();
        let node_b = CounterFactory::new(Arc::clone(&shared))
            .with_node_id("node-b")
            .create(Consistency::Accurate)
            .unwrap();

        node_a.add("orders", "count", 5, None).await.unwrap();
        node_b.add("orders", "count", 6, None).await.unwrap();

        let reading = node_a.get("orders", "count").await.unwrap();
        assert_eq!(reading.value, 11);
        assert_eq!(reading.consistency, Consistency::Accurate);

        let conn = store.connection();
        assert!(conn
            .hget_all("counter:orders:count:deltas")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            conn.get("counter:orders:count:snapshot").await.unwrap(),
            Some("11".to_string())
        );
    }

    #[tokio::test]
    async fn test_clear_semantics_with_token() {
        let store = MemoryStore::new();
        let factory = CounterFactory::new(manager(&store).await);
        let counter = factory.create(Consistency::BestEffort).unwrap();
        let token = IdempotencyToken::generate();

        counter.add("orders", "count", 7, None).await.unwrap();
        counter.clear("orders", "count", Some(&token)).await.unwrap();
        assert_eq!(counter.get("orders", "count").await.unwrap().value, 0);

        // The same token again is a no-op.
        counter.clear("orders", "count", Some(&token)).await.unwrap();
        assert_eq!(counter.get("orders", "count").await.unwrap().value, 0);
    }

    #[tokio::test]
    async fn test_circuit_opens_then_recovers() {
        let store = MemoryStore::new();
        let shared = manager(&store).await;
        let factory = CounterFactory::new(Arc::clone(&shared));
        let counter = factory.create(Consistency::BestEffort).unwrap();

        // Drive the breaker's window to 100% failures.
        store.inject_failures(1000);
        for _ in 0..6 {
            let _ = counter.get("orders", "count").await;
        }

        // Fail-fast without touching the store.
        let denied = counter.get("orders", "count").await;
        match denied {
            Err(CounterError::Store(StoreError::CircuitOpen)) => {}
            other => panic!("expected circuit-open failure, got {other:?}"),
        }

        // After the open-state duration the breaker admits trial calls.
        store.inject_failures(0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(counter.get("orders", "count").await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_tokens_sum_after_rollup() {
        let store = MemoryStore::new();
        let shared = manager(&store).await;
        let counter = CounterFactory::new(Arc::clone(&shared))
            .with_node_id("node-a")
            .create(Consistency::EventuallyConsistent)
            .unwrap();

        let deltas: Vec<i64> = vec![5, -2, 9, 1, -3, 4];
        for delta in &deltas {
            let token = IdempotencyToken::generate();
            counter
                .add("orders", "count", *delta, Some(&token))
                .await
                .unwrap();
        }

        let sweep = DeltaSweep::new(Arc::clone(&shared), "orders");
        sweep.run_once().await.unwrap();

        let expected: i64 = deltas.iter().sum();
        assert_eq!(
            counter.get("orders", "count").await.unwrap().value,
            expected
        );

        // Running the sweep again with no writer activity changes nothing.
        sweep.run_once().await.unwrap();
        assert_eq!(
            counter.get("orders", "count").await.unwrap().value,
            expected
        );
    }

    #[tokio::test]
    async fn test_same_token_across_strategies_of_one_counter() {
        let store = MemoryStore::new();
        let shared = manager(&store).await;
        let counter = CounterFactory::new(Arc::clone(&shared))
            .with_node_id("node-a")
            .create(Consistency::Accurate)
            .unwrap();
        let token = IdempotencyToken::generate();

        counter
            .add("orders", "count", 8, Some(&token))
            .await
            .unwrap();
        counter
            .add("orders", "count", 8, Some(&token))
            .await
            .unwrap();

        assert_eq!(counter.get("orders", "count").await.unwrap().value, 8);
    }

    #[tokio::test]
    async fn test_blank_namespace_is_rejected_before_the_store() {
        let store = MemoryStore::new();
        let factory = CounterFactory::new(manager(&store).await);
        let counter = factory.create(Consistency::BestEffort).unwrap();

        let result = counter.add("", "count", 1, None).await;
        match result {
            Err(CounterError::InvalidArgument(_)) => {}
            other => panic!("expected invalid-argument failure, got {other:?}"),
        }
        assert!(store.is_empty());
    }
}
