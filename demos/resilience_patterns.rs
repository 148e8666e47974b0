//! Resilience Patterns Demo
//!
//! Walks through the three protections end to end:
//! - A resilient client calling an unreachable host until its circuit opens
//! - A local cache with silent fallback semantics
//! - The consecutive-failure watchdog escalating after repeated critical failures
//!
//! Usage:
//!   RUST_LOG=cascade_guard=debug cargo run --example resilience_patterns

use cascade_guard::cache::{CacheConfig, CacheService};
use cascade_guard::resilience::{FailureWatchdog, WatchdogConfig};
use cascade_guard::{Error, ResilientClient};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> cascade_guard::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cascade_guard=info")),
        )
        .init();

    println!("=== cascade-guard Resilience Patterns Demo ===\n");

    demo_circuit_breaker().await?;
    demo_cache().await?;
    demo_watchdog()?;
    Ok(())
}

async fn demo_circuit_breaker() -> cascade_guard::Result<()> {
    println!("--- Example 1: Retry inside a circuit breaker ---\n");

    let client = ResilientClient::builder()
        .base_address("http://127.0.0.1:1")
        .retries(2)
        .retry_delay(Arc::new(|n| Duration::from_millis(50 * n as u64)))
        .timeout(Duration::from_millis(500))
        .minimum_volume(3)
        .reset_timeout(Duration::from_secs(2))
        .build()?;

    println!("Client Configuration:");
    println!("  - Retries: 2 (50ms, 100ms)");
    println!("  - Breaker: opens at 50% errors after 3 calls, 2s reset\n");

    for i in 1..=5 {
        match client.get("/quotes", Some("quotes")).await {
            Ok(Some(resp)) => println!("Request {}: status {}", i, resp.status),
            Ok(None) => println!("Request {}: circuit OPEN, served fallback", i),
            Err(e) => println!("Request {}: failed after retries: {}", i, e),
        }
    }

    if let Some(status) = client.circuit_status(Some("quotes")) {
        println!(
            "\nCircuit 'quotes': state={} failures={} rejected={}",
            status.state, status.failures, status.rejected
        );
    }

    println!("Waiting for reset timeout...");
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    match client.get("/quotes", Some("quotes")).await {
        Ok(_) => println!("Trial call admitted"),
        Err(e) => println!("Trial call failed, circuit re-opened: {}", e),
    }
    println!();
    Ok(())
}

async fn demo_cache() -> cascade_guard::Result<()> {
    println!("--- Example 2: Cache with silent fallback ---\n");

    let cache = CacheService::new(CacheConfig::from_env())?;
    println!("Backend: {}", cache.backend_name());

    cache
        .set("quote:ACME", &serde_json::json!({"price": 12.5}), Some(60))
        .await;
    let cached: Option<serde_json::Value> = cache.get("quote:ACME").await;
    println!("quote:ACME -> {:?}", cached);

    let missing: Option<serde_json::Value> = cache.get("quote:NONE").await;
    println!("quote:NONE -> {:?}", missing);

    let stats = cache.stats();
    println!(
        "Stats: hits={} misses={} hit_ratio={:.2}\n",
        stats.hits,
        stats.misses,
        stats.hit_ratio()
    );
    cache.close().await
}

fn demo_watchdog() -> cascade_guard::Result<()> {
    println!("--- Example 3: Consecutive-failure watchdog ---\n");

    // Embedded mode: report the threshold instead of exiting the demo.
    let watchdog = FailureWatchdog::new(
        WatchdogConfig::new()
            .with_threshold(3)
            .with_terminate(false),
    )?;

    watchdog.handle_failure()?;
    watchdog.handle_failure()?;
    println!("Two failures recorded, then a success re-arms the watchdog");
    watchdog.handle_success();

    for i in 1..=3 {
        match watchdog.handle_failure() {
            Ok(()) => println!("Failure {}: below threshold", i),
            Err(e @ Error::FailureThreshold { .. }) => {
                let e = watchdog.escalate(e);
                println!("Failure {}: escalated -> {}", i, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
