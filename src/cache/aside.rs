//! Cache-aside orchestration for read paths.
//!
//! Every cacheable read goes through [`CacheAside::cached`]: look the key up,
//! compute on a miss, populate with the policy TTL. The store is an
//! accelerator only. When it fails the read falls through to `compute`, and
//! a failed populate never fails the read.

use std::future::Future;
use std::num::NonZeroU64;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::keys::CacheKey;
use super::metrics::{
    METRIC_CACHE_BYPASS, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_POPULATE_SKIPPED,
    METRIC_CACHE_UNAVAILABLE,
};
use super::policy::TtlPolicy;
use super::store::{CacheStore, StoreError};
use super::ttl::Ttl;

/// Serialized form of an absent value. Never written to the store.
const NULL_PAYLOAD: &str = "null";

/// Metric label for reads keyed outside the typed key families.
const CUSTOM_FAMILY: &str = "custom";

#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    policy: Arc<TtlPolicy>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>, policy: Arc<TtlPolicy>) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result with the family's policy TTL.
    ///
    /// `compute` runs at most once per call and its error is returned as is.
    /// Concurrent misses on the same key each compute; the last write wins.
    #[instrument(skip_all, fields(key = %key, family = key.family().name()))]
    pub async fn cached<T, E, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let family = key.family();
        let ttl = self.policy.resolve(family);
        self.read_through(&key.to_string(), family.name(), ttl, compute)
            .await
    }

    /// Same as [`cached`](Self::cached) for a raw key with an explicit TTL.
    #[instrument(skip_all, fields(key = %key, ttl = %ttl))]
    pub async fn cached_with_ttl<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Ttl,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.read_through(key, CUSTOM_FAMILY, ttl, compute).await
    }

    async fn read_through<T, E, F, Fut>(
        &self,
        key: &str,
        family: &'static str,
        ttl: Ttl,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Ttl::Seconds(ttl_secs) = ttl else {
            counter!(METRIC_CACHE_BYPASS, "family" => family).increment(1);
            debug!("Never-cached family, reading from source");
            return compute().await;
        };

        if let Some(value) = self.lookup(key, family).await {
            return Ok(value);
        }

        let value = compute().await?;
        self.populate(key, family, ttl_secs, &value).await;
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, family: &'static str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                counter!(METRIC_CACHE_MISS, "family" => family).increment(1);
                debug!("Cache miss");
                return None;
            }
            Err(err) => {
                record_store_error("get", family, &err);
                counter!(METRIC_CACHE_MISS, "family" => family).increment(1);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                counter!(METRIC_CACHE_HIT, "family" => family).increment(1);
                debug!("Cache hit");
                Some(value)
            }
            Err(err) => {
                counter!(METRIC_CACHE_MISS, "family" => family).increment(1);
                warn!(error = %err, "Cached payload does not decode, recomputing");
                None
            }
        }
    }

    async fn populate<T: Serialize>(
        &self,
        key: &str,
        family: &'static str,
        ttl_secs: NonZeroU64,
        value: &T,
    ) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Computed value does not serialize, not caching");
                return;
            }
        };

        if payload == NULL_PAYLOAD {
            counter!(METRIC_CACHE_POPULATE_SKIPPED, "family" => family).increment(1);
            debug!("Computed value is null, not caching");
            return;
        }

        match self.store.set(key, &payload, ttl_secs).await {
            Ok(()) => debug!(ttl_secs = ttl_secs.get(), "Cache populated"),
            Err(err) => record_store_error("set", family, &err),
        }
    }
}

fn record_store_error(op: &'static str, family: &'static str, err: &StoreError) {
    if err.is_unavailable() {
        counter!(METRIC_CACHE_UNAVAILABLE, "op" => op, "family" => family).increment(1);
    }
    warn!(op, error = %err, "Cache store call failed, continuing without cache");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::application::pagination::PageRequest;
    use crate::cache::store::MemoryStore;

    fn fixture() -> (Arc<MemoryStore>, CacheAside) {
        let store = Arc::new(MemoryStore::new());
        let aside = CacheAside::new(store.clone(), Arc::new(TtlPolicy::default()));
        (store, aside)
    }

    fn product_key() -> CacheKey {
        CacheKey::Product {
            id: Uuid::from_u128(1),
        }
    }

    async fn counted(calls: &AtomicUsize, value: &str) -> Result<String, &'static str> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.to_string())
    }

    #[tokio::test]
    async fn hit_suppresses_compute() {
        let (store, aside) = fixture();
        let ttl = NonZeroU64::new(60).expect("non-zero");
        store
            .set(&product_key().to_string(), "\"stored\"", ttl)
            .await
            .expect("seed");

        let calls = AtomicUsize::new(0);
        let value = aside
            .cached(&product_key(), || counted(&calls, "fresh"))
            .await;
        assert_eq!(value, Ok("stored".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_computes_once_then_hits() {
        let (store, aside) = fixture();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = aside
                .cached(&product_key(), || counted(&calls, "fresh"))
                .await;
            assert_eq!(value, Ok("fresh".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(&product_key().to_string()).await,
            Ok(Some("\"fresh\"".to_string()))
        );
    }

    #[tokio::test]
    async fn null_results_are_not_cached() {
        let (store, aside) = fixture();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Result<Option<String>, &str> = aside
                .cached(&product_key(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await;
            assert_eq!(value, Ok(None));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn compute_errors_propagate_and_nothing_is_written() {
        let (store, aside) = fixture();
        let value: Result<String, &str> = aside
            .cached(&product_key(), || async { Err("database down") })
            .await;
        assert_eq!(value, Err("database down"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn never_families_bypass_the_store() {
        let (store, aside) = fixture();
        let key = CacheKey::MyOrders {
            user_id: Uuid::from_u128(2),
            page: PageRequest::default(),
        };
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _ = aside.cached(&key, || counted(&calls, "orders")).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_miss_and_is_overwritten() {
        let (store, aside) = fixture();
        let key = product_key().to_string();
        let ttl = NonZeroU64::new(60).expect("non-zero");
        store.set(&key, "{\"legacy\":true}", ttl).await.expect("seed");

        let calls = AtomicUsize::new(0);
        let value = aside
            .cached(&product_key(), || counted(&calls, "fresh"))
            .await;
        assert_eq!(value, Ok("fresh".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&key).await, Ok(Some("\"fresh\"".to_string())));
    }

    #[tokio::test]
    async fn unavailable_store_fails_open() {
        let (store, aside) = fixture();
        store.set_available(false);
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let value = aside
                .cached(&product_key(), || counted(&calls, "fresh"))
                .await;
            assert_eq!(value, Ok("fresh".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn policy_ttl_bounds_entry_lifetime() {
        let (_store, aside) = fixture();
        let calls = AtomicUsize::new(0);
        let ttl = aside
            .policy()
            .resolve(product_key().family())
            .as_secs()
            .expect("products are cached");

        let _ = aside.cached(&product_key(), || counted(&calls, "v1")).await;
        tokio::time::advance(Duration::from_secs(ttl) - Duration::from_millis(1)).await;
        let before = aside.cached(&product_key(), || counted(&calls, "v2")).await;
        assert_eq!(before, Ok("v1".to_string()));

        tokio::time::advance(Duration::from_millis(2)).await;
        let after = aside.cached(&product_key(), || counted(&calls, "v2")).await;
        assert_eq!(after, Ok("v2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn explicit_ttl_reads_use_raw_keys() {
        let (store, aside) = fixture();
        let calls = AtomicUsize::new(0);
        let value = aside
            .cached_with_ttl("report:daily", Ttl::from_secs(30), || {
                counted(&calls, "report")
            })
            .await;
        assert_eq!(value, Ok("report".to_string()));
        assert_eq!(
            store.get("report:daily").await,
            Ok(Some("\"report\"".to_string()))
        );
    }
}
