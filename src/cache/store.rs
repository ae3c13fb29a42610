//! Cache store abstraction and in-process implementations.
//!
//! `CacheStore` is the seam between the cache-aside orchestrator and the
//! key/value backend. `MemoryStore` backs tests and single-node runs,
//! `NoopStore` is used when caching is disabled, and the Redis store lives in
//! `cache::redis`.

use std::collections::BTreeMap;
use std::num::{NonZeroU64, NonZeroUsize};
use std::ops::Bound;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// SCAN batch size used when none is configured.
pub const DEFAULT_SCAN_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(100).unwrap();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached or did not answer in time.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend rejected `{op}`: {message}")]
    Backend { op: &'static str, message: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn backend(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            op,
            message: err.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Key/value store with per-key expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stored value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value, expiring after
    /// `ttl_secs`. The write is visible to `get` once this returns.
    async fn set(&self, key: &str, value: &str, ttl_secs: NonZeroU64) -> Result<(), StoreError>;

    /// Delete one key. Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// Delete every key matching a glob pattern, traversing the key space in
    /// bounded batches. Each batch is removed atomically; the traversal as a
    /// whole is not. Returns the total removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Release backend resources. Stores that hold data report `Unavailable`
    /// on later calls; the noop store keeps missing.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process store over an ordered map.
///
/// Expired entries are dropped lazily on access and during pattern scans.
/// Expiry uses `tokio::time`, so paused-clock tests control it.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    scan_batch_size: NonZeroUsize,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_scan_batch_size(DEFAULT_SCAN_BATCH_SIZE)
    }

    pub fn with_scan_batch_size(scan_batch_size: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            scan_batch_size,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store marked unavailable"))
        }
    }

    /// Collect up to one batch of matching keys after `cursor`. Returns the
    /// matches and the next cursor (`None` once the key space is exhausted).
    fn scan_batch(
        &self,
        matcher: &GlobMatcher,
        cursor: Option<&str>,
    ) -> (Vec<String>, Option<String>) {
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "scan");
        let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
        let mut examined = 0;
        let mut last = None;
        let mut matched = Vec::new();
        for (key, entry) in entries.range::<str, _>((lower, Bound::Unbounded)) {
            if examined == self.scan_batch_size.get() {
                return (matched, last);
            }
            examined += 1;
            last = Some(key.clone());
            if entry.is_live(now) && matcher.is_match(key) {
                matched.push(key.clone());
            }
        }
        (matched, None)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = rw_write(&self.entries, SOURCE, "get.purge");
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: NonZeroU64) -> Result<(), StoreError> {
        self.ensure_available()?;
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs.get()),
        };
        rw_write(&self.entries, SOURCE, "set").insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        let removed = rw_write(&self.entries, SOURCE, "delete").remove(key);
        Ok(u64::from(removed.is_some_and(|entry| entry.is_live(now))))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let matcher = Glob::new(pattern)
            .map_err(|err| StoreError::backend("delete_by_pattern", err))?
            .compile_matcher();

        let mut cursor: Option<String> = None;
        let mut total = 0_u64;
        let mut batches = 0_u32;
        loop {
            let (keys, next) = self.scan_batch(&matcher, cursor.as_deref());
            if !keys.is_empty() {
                let mut entries = rw_write(&self.entries, SOURCE, "delete_by_pattern");
                for key in &keys {
                    if entries.remove(key).is_some() {
                        total += 1;
                    }
                }
            }
            batches += 1;
            match next {
                Some(next) => {
                    cursor = Some(next);
                    tokio::task::yield_now().await;
                    self.ensure_available()?;
                }
                None => break,
            }
        }

        debug!(pattern, deleted = total, batches, "Pattern delete finished");
        Ok(total)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_available()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.set_available(false);
        rw_write(&self.entries, SOURCE, "close").clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Store that holds nothing. Every read misses and every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl CacheStore for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl_secs: NonZeroU64) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "noop"
    }
}
