//! Redis-backed [`RemoteStore`].

use super::backend::RemoteStore;
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis store whose connection is installed by [`RemoteStore::connect`].
///
/// Until the connection exists every call fails with a "not connected" cache error, which
/// the cache service turns into a miss.
pub struct RedisStore {
    client: redis::Client,
    conn: ArcSwapOption<ConnectionManager>,
}

fn redis_error(op: &str, e: redis::RedisError) -> Error {
    Error::cache_with_context(
        e.to_string(),
        ErrorContext::new()
            .with_details(format!("operation: {}", op))
            .with_source("redis_store"),
    )
}

impl RedisStore {
    pub fn new(address: &str) -> Result<Self> {
        let client = redis::Client::open(address).map_err(|e| {
            Error::configuration_with_context(
                "invalid remote cache address",
                ErrorContext::new()
                    .with_field_path("cache.remote_address")
                    .with_details(e.to_string())
                    .with_source("redis_store"),
            )
        })?;
        Ok(Self {
            client,
            conn: ArcSwapOption::empty(),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .load_full()
            .map(|c| c.as_ref().clone())
            .ok_or_else(|| {
                Error::cache_with_context(
                    "not connected",
                    ErrorContext::new().with_source("redis_store"),
                )
            })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn connect(&self) -> Result<()> {
        let connecting = ConnectionManager::new(self.client.clone());
        let manager = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| {
                Error::cache_with_context(
                    format!("connect timed out after {:?}", CONNECT_TIMEOUT),
                    ErrorContext::new().with_source("redis_store"),
                )
            })?
            .map_err(|e| redis_error("connect", e))?;
        self.conn.store(Some(Arc::new(manager)));
        info!("redis connection established");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| redis_error("get", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_error("set", e))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| redis_error("ping", e))
    }

    async fn close(&self) -> Result<()> {
        self.conn.store(None);
        info!("redis connection released");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
