//! Storefront read-path caching: typed cache keys, a per-family freshness
//! policy, a cache-aside orchestrator and write-path invalidation, plus the
//! services and binary that wire them to the store of record.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
