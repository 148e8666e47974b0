//! CacheService fallback semantics over a fake remote store

use super::fakes::FakeStore;
use cascade_guard::cache::{CacheBreakerConfig, CacheConfig, CacheLookup, CacheService};
use cascade_guard::BreakerState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: f64,
}

fn quote() -> Quote {
    Quote {
        symbol: "ACME".into(),
        price: 12.5,
    }
}

fn breaker(minimum_volume: u32, reset_ms: u64) -> CacheBreakerConfig {
    CacheBreakerConfig {
        minimum_volume,
        reset_timeout: Duration::from_millis(reset_ms),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_remote_round_trip() {
    let store = FakeStore::new();
    let cache = CacheService::with_remote_store(store.clone(), CacheConfig::default()).unwrap();
    store.wait_connected().await;

    cache.set("quote:acme", &quote(), None).await;
    assert_eq!(store.raw("quote:acme").unwrap(), r#"{"symbol":"ACME","price":12.5}"#);
    assert_eq!(store.ttl("quote:acme"), Some(300));

    assert_eq!(cache.get::<Quote>("quote:acme").await, Some(quote()));
    assert_eq!(cache.get::<Quote>("quote:none").await, None);
    assert_eq!(cache.lookup::<Quote>("quote:none").await, CacheLookup::Miss);

    assert!(cache.is_remote());
    assert_eq!(cache.backend_name(), "fake");
    assert!(cache.ping().await.is_ok());
}

#[tokio::test]
async fn test_ttl_override_and_default() {
    let store = FakeStore::new();
    let cache = CacheService::with_remote_store(
        store.clone(),
        CacheConfig::new().with_ttl_secs(45),
    )
    .unwrap();
    store.wait_connected().await;

    cache.set("a", &1, Some(60)).await;
    cache.set("b", &2, None).await;
    cache.set("c", &3, Some(0)).await;

    assert_eq!(store.ttl("a"), Some(60));
    assert_eq!(store.ttl("b"), Some(45));
    assert_eq!(store.ttl("c"), Some(45));
}

#[tokio::test]
async fn test_store_failures_are_absorbed() {
    let store = FakeStore::new();
    let cache = CacheService::with_remote_store(store.clone(), CacheConfig::default()).unwrap();
    store.wait_connected().await;
    cache.set("k", &json!({"v": 1}), None).await;

    store.set_failing(true);
    assert_eq!(cache.get::<serde_json::Value>("k").await, None);
    assert_eq!(
        cache.lookup::<serde_json::Value>("k").await,
        CacheLookup::Unavailable
    );
    cache.set("k2", &"ignored", None).await;
    assert!(store.raw("k2").is_none());
    assert!(cache.ping().await.is_err());

    let stats = cache.stats();
    assert_eq!(stats.errors, 3);
    assert_eq!(stats.sets, 1);
}

#[tokio::test]
async fn test_open_breaker_skips_store() {
    let store = FakeStore::new();
    let cache = CacheService::with_remote_store(
        store.clone(),
        CacheConfig::new().with_breaker(breaker(2, 60_000)),
    )
    .unwrap();
    store.wait_connected().await;

    store.set_failing(true);
    assert!(cache.get::<String>("x").await.is_none());
    assert!(cache.get::<String>("x").await.is_none());
    assert_eq!(cache.breaker_status().unwrap().state, BreakerState::Open);

    store.set_failing(false);
    let gets_before = store.gets();
    assert_eq!(cache.lookup::<String>("x").await, CacheLookup::Unavailable);
    cache.set("x", &"value", None).await;
    assert_eq!(store.gets(), gets_before);
    assert!(store.raw("x").is_none());
    assert_eq!(cache.stats().fallbacks, 2);
}

#[tokio::test]
async fn test_breaker_recovers_after_reset_timeout() {
    let store = FakeStore::new();
    let cache = CacheService::with_remote_store(
        store.clone(),
        CacheConfig::new().with_breaker(breaker(1, 100)),
    )
    .unwrap();
    store.wait_connected().await;

    store.set_failing(true);
    assert!(cache.get::<i32>("n").await.is_none());
    assert_eq!(cache.breaker_status().unwrap().state, BreakerState::Open);

    store.set_failing(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    cache.set("n", &5, None).await;
    assert_eq!(cache.breaker_status().unwrap().state, BreakerState::Closed);
    assert_eq!(cache.get::<i32>("n").await, Some(5));
}

#[tokio::test]
async fn test_calls_before_connect_fall_back() {
    let store = FakeStore::with_connect_delay(Duration::from_millis(150));
    let cache = CacheService::with_remote_store(store.clone(), CacheConfig::default()).unwrap();

    assert!(!store.is_connected());
    assert_eq!(cache.lookup::<i32>("early").await, CacheLookup::Unavailable);
    cache.set("early", &1, None).await;
    assert!(store.raw("early").is_none());

    store.wait_connected().await;
    cache.set("late", &2, None).await;
    assert_eq!(cache.get::<i32>("late").await, Some(2));
    assert_eq!(cache.breaker_status().unwrap().state, BreakerState::Closed);
}

#[tokio::test]
async fn test_close_releases_store() {
    let store = FakeStore::new();
    let cache = CacheService::with_remote_store(store.clone(), CacheConfig::default()).unwrap();
    store.wait_connected().await;

    cache.close().await.unwrap();
    assert!(!store.is_connected());
    assert!(cache.get::<i32>("any").await.is_none());
}

#[tokio::test]
async fn test_local_entries_expire() {
    let cache = CacheService::local(CacheConfig::default()).unwrap();
    cache.set("short", &"lived", Some(1)).await;
    cache.set("long", &"lived", None).await;
    assert_eq!(cache.get::<String>("short").await.as_deref(), Some("lived"));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(cache.get::<String>("short").await.is_none());
    assert_eq!(cache.get::<String>("long").await.as_deref(), Some("lived"));
    assert!(cache.breaker_status().is_none());
}

#[test]
fn test_remote_store_requires_runtime() {
    let store = FakeStore::new();
    assert!(CacheService::with_remote_store(store, CacheConfig::default()).is_err());
}
