//! Cache service.

use super::backend::{MemoryStore, RemoteStore};
use crate::config::duration_ms;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
use crate::{Error, ErrorContext, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CACHE_CIRCUIT_KEY: &str = "cache";

/// Breaker settings for remote cache traffic.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheBreakerConfig {
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    pub error_threshold_percentage: u8,
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,
    pub minimum_volume: u32,
}

impl Default for CacheBreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3_000),
            error_threshold_percentage: 50,
            reset_timeout: Duration::from_millis(10_000),
            minimum_volume: 5,
        }
    }
}

impl CacheBreakerConfig {
    fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_timeout(self.timeout)
            .with_error_threshold_percentage(self.error_threshold_percentage)
            .with_reset_timeout(self.reset_timeout)
            .with_minimum_volume(self.minimum_volume)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Remote store address. `None` selects the in-process store.
    pub remote_address: Option<String>,
    pub default_ttl_secs: u64,
    /// Capacity of the in-process store.
    pub max_entries: usize,
    pub key_prefix: Option<String>,
    pub breaker: CacheBreakerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_address: None,
            default_ttl_secs: 300,
            max_entries: 10_000,
            key_prefix: None,
            breaker: CacheBreakerConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    pub fn with_ttl_secs(mut self, ttl: u64) -> Self {
        self.default_ttl_secs = ttl;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_breaker(mut self, breaker: CacheBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Defaults overridden by `CASCADE_GUARD_CACHE_URL` and `CASCADE_GUARD_CACHE_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("CASCADE_GUARD_CACHE_URL") {
            if !url.trim().is_empty() {
                cfg.remote_address = Some(url);
            }
        }
        if let Some(ttl) = env::var("CASCADE_GUARD_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.default_ttl_secs = ttl;
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(Error::configuration_with_context(
                "default TTL must be at least one second",
                ErrorContext::new()
                    .with_field_path("cache.default_ttl_secs")
                    .with_source("cache_config"),
            ));
        }
        if self.max_entries == 0 {
            return Err(Error::configuration_with_context(
                "max_entries must be greater than zero",
                ErrorContext::new()
                    .with_field_path("cache.max_entries")
                    .with_source("cache_config"),
            ));
        }
        self.breaker.to_breaker_config().validate()
    }
}

/// Outcome of [`CacheService::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss,
    /// The store failed, the breaker was open, or the stored value did not decode.
    Unavailable,
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    /// Calls short-circuited by the open breaker.
    pub fallbacks: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    fallbacks: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

enum Backend {
    Remote {
        store: Arc<dyn RemoteStore>,
        breaker: CircuitBreaker,
    },
    Local(MemoryStore),
}

/// Key-value cache whose failures never reach the caller.
///
/// The backend is chosen once at construction: a remote store guarded by one shared
/// breaker, or an in-process [`MemoryStore`]. `get` and `set` degrade to "absent" and
/// "no-op" on any failure.
pub struct CacheService {
    config: CacheConfig,
    backend: Backend,
    stats: AtomicStats,
}

impl CacheService {
    /// Build from config. A remote address selects `RedisStore`, which
    /// requires the `redis` feature and a running tokio runtime.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        match config.remote_address.clone() {
            None => Self::local(config),
            Some(address) => Self::remote_from_address(&address, config),
        }
    }

    #[cfg(feature = "redis")]
    fn remote_from_address(address: &str, config: CacheConfig) -> Result<Self> {
        let store = Arc::new(super::RedisStore::new(address)?);
        Self::with_remote_store(store, config)
    }

    #[cfg(not(feature = "redis"))]
    fn remote_from_address(address: &str, _config: CacheConfig) -> Result<Self> {
        Err(Error::configuration_with_context(
            "remote cache requires the `redis` feature",
            ErrorContext::new()
                .with_field_path("cache.remote_address")
                .with_details(address.to_string())
                .with_source("cache_service"),
        ))
    }

    /// In-process backend, ignoring any remote address.
    pub fn local(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let store = MemoryStore::new(config.max_entries);
        info!(
            backend = store.name(),
            max_entries = config.max_entries,
            default_ttl_secs = config.default_ttl_secs,
            "cache configured"
        );
        Ok(Self {
            config,
            backend: Backend::Local(store),
            stats: AtomicStats::default(),
        })
    }

    /// Remote backend over `store`. The connection is started in the background and not
    /// awaited; calls made before it completes take the fallback path.
    pub fn with_remote_store(store: Arc<dyn RemoteStore>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::runtime_with_context(
                "remote cache must be created inside a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("cache_service"),
            )
        })?;

        let breaker =
            CircuitBreaker::new(CACHE_CIRCUIT_KEY, config.breaker.to_breaker_config())?;

        let connecting = Arc::clone(&store);
        handle.spawn(async move {
            if let Err(e) = connecting.connect().await {
                error!(backend = connecting.name(), error = %e, "remote cache connect failed");
            }
        });

        info!(
            backend = store.name(),
            default_ttl_secs = config.default_ttl_secs,
            "cache configured"
        );
        Ok(Self {
            config,
            backend: Backend::Remote { store, breaker },
            stats: AtomicStats::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached value for `key`, or `None` on a miss or any failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).await.into_option()
    }

    /// Like [`get`](Self::get) but keeps a miss apart from a failure.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let key = self.prefixed(key);
        match &self.backend {
            Backend::Local(store) => match store.get(&key) {
                Some(value) => match serde_json::from_value(value) {
                    Ok(v) => self.hit(v),
                    Err(e) => self.failed(&key, "decode", &Error::from(e)),
                },
                None => self.miss(),
            },
            Backend::Remote { store, breaker } => {
                let store = Arc::clone(store);
                let k = key.clone();
                match breaker.fire(move || async move { store.get(&k).await }).await {
                    Ok(Some(Some(raw))) => match serde_json::from_str(&raw) {
                        Ok(v) => self.hit(v),
                        Err(e) => self.failed(&key, "decode", &Error::from(e)),
                    },
                    Ok(Some(None)) => self.miss(),
                    Ok(None) => self.fallback(&key, "get"),
                    Err(e) => self.failed(&key, "get", &e),
                }
            }
        }
    }

    /// Store `value` under `key`. A TTL of `None` or zero uses the configured default.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) {
        let key = self.prefixed(key);
        let ttl = ttl_secs
            .filter(|t| *t > 0)
            .unwrap_or(self.config.default_ttl_secs);

        match &self.backend {
            Backend::Local(store) => match serde_json::to_value(value) {
                Ok(v) => {
                    store.set(&key, v, Duration::from_secs(ttl));
                    AtomicStats::bump(&self.stats.sets);
                }
                Err(e) => {
                    self.failed::<()>(&key, "encode", &Error::from(e));
                }
            },
            Backend::Remote { store, breaker } => {
                let raw = match serde_json::to_string(value) {
                    Ok(raw) => raw,
                    Err(e) => {
                        self.failed::<()>(&key, "encode", &Error::from(e));
                        return;
                    }
                };
                let store = Arc::clone(store);
                let k = key.clone();
                match breaker
                    .fire(move || async move { store.set(&k, &raw, ttl).await })
                    .await
                {
                    Ok(Some(())) => {
                        AtomicStats::bump(&self.stats.sets);
                        debug!(key = key.as_str(), ttl_secs = ttl, "cache set");
                    }
                    Ok(None) => {
                        self.fallback::<()>(&key, "set");
                    }
                    Err(e) => {
                        self.failed::<()>(&key, "set", &e);
                    }
                }
            }
        }
    }

    /// Probe the remote store directly, bypassing the breaker. Always `Ok` in local mode.
    pub async fn ping(&self) -> Result<()> {
        match &self.backend {
            Backend::Remote { store, .. } => store.ping().await,
            Backend::Local(_) => Ok(()),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match &self.backend {
            Backend::Remote { store, .. } => store.close().await,
            Backend::Local(store) => {
                store.clear();
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    /// Breaker status for the remote backend; `None` in local mode.
    pub fn breaker_status(&self) -> Option<CircuitBreakerSnapshot> {
        match &self.backend {
            Backend::Remote { breaker, .. } => Some(breaker.snapshot()),
            Backend::Local(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.backend, Backend::Remote { .. })
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Remote { store, .. } => store.name(),
            Backend::Local(store) => store.name(),
        }
    }

    fn prefixed(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(p) => format!("{}:{}", p, key),
            None => key.to_string(),
        }
    }

    fn hit<T>(&self, value: T) -> CacheLookup<T> {
        AtomicStats::bump(&self.stats.hits);
        CacheLookup::Hit(value)
    }

    fn miss<T>(&self) -> CacheLookup<T> {
        AtomicStats::bump(&self.stats.misses);
        CacheLookup::Miss
    }

    fn fallback<T>(&self, key: &str, op: &str) -> CacheLookup<T> {
        AtomicStats::bump(&self.stats.fallbacks);
        warn!(key, op, "cache circuit open, using fallback");
        CacheLookup::Unavailable
    }

    fn failed<T>(&self, key: &str, op: &str, err: &Error) -> CacheLookup<T> {
        AtomicStats::bump(&self.stats.errors);
        error!(key, op, error = %err, "cache operation failed");
        CacheLookup::Unavailable
    }
}
