//! Runtime cache configuration.
//!
//! Built from the `[cache]` section of `storefront.toml` by
//! `config::load`; defaults apply when the section is absent.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::policy::TtlPolicy;
use super::redis::RedisOptions;
use super::store::DEFAULT_SCAN_BATCH_SIZE;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false every read goes to the store of record.
    pub enabled: bool,
    /// Redis endpoint. Without one the in-process store is used.
    pub redis_url: Option<String>,
    /// Keys examined per SCAN step during pattern deletes.
    pub scan_batch_size: NonZeroUsize,
    pub operation_timeout: Duration,
    pub connect_timeout: Duration,
    pub policy: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            policy: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn redis_options(&self) -> RedisOptions {
        RedisOptions {
            scan_batch_size: self.scan_batch_size,
            operation_timeout: self.operation_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}
