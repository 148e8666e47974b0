//! 缓存模块：为远程缓存提供熔断保护，失败时静默降级为未命中。
//!
//! # Cache Module
//!
//! A key-value cache that protects callers from store outages. With a remote store every
//! call goes through one shared circuit breaker; failures and an open circuit degrade to
//! "absent" on reads and "no-op" on writes, so a cache outage never becomes a caller error.
//! Without a remote address the service uses an in-process LRU store instead.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheService`] | Facade with fallback semantics, TTLs and statistics |
//! | [`CacheConfig`] | Backend selection, default TTL and breaker settings |
//! | [`CacheLookup`] | Hit / miss / unavailable outcome of a read |
//! | [`RemoteStore`] | Trait for remote key-value stores |
//! | [`MemoryStore`] | In-process LRU store with per-entry expiry |
//! | `RedisStore` | Redis implementation (feature `redis`) |
//!
//! ## Example
//!
//! ```rust
//! use cascade_guard::cache::{CacheConfig, CacheService};
//!
//! # #[tokio::main]
//! # async fn main() -> cascade_guard::Result<()> {
//! let cache = CacheService::local(CacheConfig::new().with_ttl_secs(60))?;
//! cache.set("greeting", &"hello", None).await;
//! assert_eq!(cache.get::<String>("greeting").await.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```

mod backend;
#[cfg(feature = "redis")]
mod redis;
mod service;

pub use backend::{MemoryStore, RemoteStore};
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use service::{CacheBreakerConfig, CacheConfig, CacheLookup, CacheService, CacheStats};
