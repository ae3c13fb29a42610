//! Cache store construction and lifecycle.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{
    CacheAside, CacheConfig, CacheStore, Invalidator, MemoryStore, NoopStore, RedisStore,
    TtlPolicy,
};

use super::error::InfraError;

/// The connected cache store plus the handles services are built from.
#[derive(Clone)]
pub struct CacheRuntime {
    store: Arc<dyn CacheStore>,
    policy: Arc<TtlPolicy>,
}

impl CacheRuntime {
    /// Build the store selected by `config`: no-op when disabled, Redis when
    /// a URL is configured, in-process otherwise.
    pub async fn connect(config: &CacheConfig) -> Result<Self, InfraError> {
        let store: Arc<dyn CacheStore> = match (config.enabled, config.redis_url.as_deref()) {
            (false, _) => Arc::new(NoopStore),
            (true, Some(url)) => Arc::new(RedisStore::connect(url, config.redis_options()).await?),
            (true, None) => {
                warn!("No redis_url configured, caching in process memory");
                Arc::new(MemoryStore::with_scan_batch_size(config.scan_batch_size))
            }
        };
        info!(backend = store.backend(), "Cache store ready");
        Ok(Self::with_store(store, config.policy.clone()))
    }

    pub fn with_store(store: Arc<dyn CacheStore>, policy: TtlPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn aside(&self) -> CacheAside {
        CacheAside::new(Arc::clone(&self.store), Arc::clone(&self.policy))
    }

    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(Arc::clone(&self.store))
    }

    pub async fn shutdown(&self) -> Result<(), InfraError> {
        self.store.close().await?;
        info!(backend = self.store.backend(), "Cache store closed");
        Ok(())
    }
}
