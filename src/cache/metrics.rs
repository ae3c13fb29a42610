//! Metric names emitted by the cache layer. Descriptions are registered in
//! `infra::telemetry`.

pub const METRIC_CACHE_HIT: &str = "storefront_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "storefront_cache_miss_total";
/// Reads of never-cached families, served straight from the store of record.
pub const METRIC_CACHE_BYPASS: &str = "storefront_cache_bypass_total";
pub const METRIC_CACHE_UNAVAILABLE: &str = "storefront_cache_unavailable_total";
pub const METRIC_CACHE_POPULATE_SKIPPED: &str = "storefront_cache_populate_skipped_total";
pub const METRIC_CACHE_INVALIDATED_KEYS: &str = "storefront_cache_invalidated_keys_total";
pub const METRIC_CACHE_INVALIDATION_MS: &str = "storefront_cache_invalidation_ms";
