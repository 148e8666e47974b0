//! Cache store collaborators.

use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Remote key-value store consumed by the cache service.
///
/// Values cross this boundary as text. Any call may fail; the cache service absorbs those
/// failures behind its breaker.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Establish the connection. Called once in the background at service construction.
    async fn connect(&self) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn ping(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        // A zero TTL means the entry never expires.
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// In-process store used in local mode.
///
/// Values are kept as `serde_json::Value` rather than text. Bounded by `max_entries` with
/// least-recently-used eviction; expired entries are dropped lazily on access.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.lock();
        let expired = entries.peek(key).map(|e| e.is_expired())?;
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.lock().put(key.to_string(), CacheEntry::new(value, ttl));
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock()
            .peek(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|(_, e)| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &'static str {
        "memory"
    }
}
