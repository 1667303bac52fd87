//! Cache store capability plus the in-process backends.
//! Stores never raise: lookups degrade to "absent", writes report a `CacheError`
//! that the orchestrator swallows.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;

use super::normalize::CacheKey;

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache disabled")]
    Disabled,
}

/// Key/value store with per-entry expiry. Must tolerate concurrent callers;
/// last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a cached translation. Absent, expired and unreachable all map to `None`.
    async fn get(&self, key: &CacheKey) -> Option<String>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_expiry(
        &self,
        key: &CacheKey,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

struct CacheEntry {
    translated_text: String,
    expires_at: Instant,
}

/// In-memory LRU translation cache with per-entry TTL.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    /// Capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key.as_str()) {
            if Instant::now() < entry.expires_at {
                return Some(entry.translated_text.clone());
            }
            cache.pop(key.as_str());
        }
        None
    }

    async fn set_with_expiry(
        &self,
        key: &CacheKey,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut cache = self.inner.lock();
        cache.put(
            key.as_str().to_owned(),
            CacheEntry {
                translated_text: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Disabled cache: every lookup misses, every write is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CacheStore for NoopCache {
    async fn get(&self, _key: &CacheKey) -> Option<String> {
        None
    }

    async fn set_with_expiry(
        &self,
        _key: &CacheKey,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Disabled)
    }

    fn backend(&self) -> &'static str {
        "none"
    }
}
