//! Storefront cache layer.
//!
//! A cache-aside front for the store of record:
//!
//! - **Keys** (`keys`): one typed variant per cached read, rendered to
//!   colon-delimited strings such as `product:<uuid>`.
//! - **Policy** (`policy`, `ttl`): freshness class and TTL per key family.
//! - **Stores** (`store`, `redis`): key/value backends with expiry and
//!   batched pattern deletes.
//! - **Reads** (`aside`): compute on miss, populate with the policy TTL.
//! - **Writes** (`invalidation`): per-mutation key/pattern deletes executed
//!   after commit.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! redis_url = "redis://127.0.0.1:6379"
//! scan_batch_size = 100
//! operation_timeout_ms = 2000
//! connect_timeout_ms = 5000
//! default_ttl = "1 day"
//!
//! # Per-family overrides; never-cached families are rejected.
//! [cache.ttl]
//! products = "5 minutes"
//! reviews = "1 hour"
//! ```

mod aside;
mod config;
mod invalidation;
mod keys;
mod lock;
pub mod metrics;
mod policy;
mod redis;
mod store;
mod ttl;

pub use aside::CacheAside;
pub use self::config::{CacheConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};
pub use invalidation::{
    ACCEPTED_STALENESS, Invalidation, InvalidationPlan, InvalidationReport, Invalidator, Mutation,
    Resource,
};
pub use keys::{CacheKey, DELIMITER, Family, KeyError, KeyPattern, Segment, WILDCARD};
pub use policy::{DEFAULT_INDEFINITE_TTL, PolicyEntry, PolicyError, TtlPolicy};
pub use self::redis::{RedisOptions, RedisStore};
pub use store::{CacheStore, DEFAULT_SCAN_BATCH_SIZE, MemoryStore, NoopStore, StoreError};
pub use ttl::{DurationError, Freshness, Ttl, parse_duration};
