use std::collections::HashMap;
use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use storefront::application::pagination::PageRequest;
use storefront::cache::metrics::{
    METRIC_CACHE_BYPASS, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED_KEYS,
    METRIC_CACHE_INVALIDATION_MS, METRIC_CACHE_MISS, METRIC_CACHE_POPULATE_SKIPPED,
    METRIC_CACHE_UNAVAILABLE,
};
use storefront::cache::{CacheAside, CacheKey, Invalidator, MemoryStore, Mutation, TtlPolicy};
use storefront::infra::telemetry;
use uuid::Uuid;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let store = Arc::new(MemoryStore::new());
    let aside = CacheAside::new(store.clone(), Arc::new(TtlPolicy::default()));
    let invalidator = Invalidator::new(store.clone());
    let id = Uuid::from_u128(1);
    let product = CacheKey::Product { id };

    // Miss, then hit
    for _ in 0..2 {
        let _: Result<u32, ()> = aside.cached(&product, || async { Ok(1) }).await;
    }

    // Null result is not cached
    let missing = CacheKey::Product {
        id: Uuid::from_u128(2),
    };
    let _: Result<Option<u32>, ()> = aside.cached(&missing, || async { Ok(None) }).await;

    // Never-class read
    let orders = CacheKey::MyOrders {
        user_id: id,
        page: PageRequest::default(),
    };
    let _: Result<u32, ()> = aside.cached(&orders, || async { Ok(0) }).await;

    // Store down
    store.set_available(false);
    let _: Result<u32, ()> = aside.cached(&product, || async { Ok(1) }).await;
    store.set_available(true);

    // Invalidation
    let report = invalidator
        .invalidate(&[Mutation::ProductChanged { id }])
        .await;
    assert_eq!(report.deleted, 1);

    let mut counters: HashMap<(String, Option<String>), u64> = HashMap::new();
    let mut names = Vec::new();
    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let key = composite_key.key();
        names.push(key.name().to_string());
        if let DebugValue::Counter(count) = value {
            let family = key
                .labels()
                .find(|label| label.key() == "family")
                .map(|label| label.value().to_string());
            *counters
                .entry((key.name().to_string(), family))
                .or_default() += count;
        }
    }

    for metric in [
        METRIC_CACHE_HIT,
        METRIC_CACHE_MISS,
        METRIC_CACHE_BYPASS,
        METRIC_CACHE_UNAVAILABLE,
        METRIC_CACHE_POPULATE_SKIPPED,
        METRIC_CACHE_INVALIDATED_KEYS,
        METRIC_CACHE_INVALIDATION_MS,
    ] {
        assert!(names.iter().any(|name| name == metric), "missing metric: {metric}");
    }

    let count = |name: &str, family: &str| {
        counters
            .get(&(name.to_string(), Some(family.to_string())))
            .copied()
            .unwrap_or(0)
    };
    assert_eq!(count(METRIC_CACHE_HIT, "product"), 1);
    // First read, null read and the read while the store was down.
    assert_eq!(count(METRIC_CACHE_MISS, "product"), 3);
    assert_eq!(count(METRIC_CACHE_POPULATE_SKIPPED, "product"), 1);
    assert_eq!(count(METRIC_CACHE_BYPASS, "my_orders"), 1);
    // The failed get and the failed populate.
    assert_eq!(count(METRIC_CACHE_UNAVAILABLE, "product"), 2);
    assert_eq!(count(METRIC_CACHE_INVALIDATED_KEYS, "product"), 1);
}
