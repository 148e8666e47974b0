//! Scripted transport and remote store fakes

use async_trait::async_trait;
use cascade_guard::cache::RemoteStore;
use cascade_guard::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use cascade_guard::{Error, ErrorContext, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted transport reaction.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    /// Connection refused before any response.
    Network,
    /// Respond 200 after the given delay.
    Hang(Duration),
}

/// Transport that replays a script, then repeats `fallback` forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_fallback(steps, Step::Status(200))
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::with_fallback(Vec::new(), step)
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    /// Append steps to the remaining script.
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.url.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Status(status) => Ok(HttpResponse::new(status, format!("status {}", status))),
            Step::Network => Err(TransportError::Connect("connection refused".into()).into()),
            Step::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(HttpResponse::new(200, "late"))
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// In-memory [`RemoteStore`] with injectable failures and a slow connect.
pub struct FakeStore {
    data: Mutex<HashMap<String, String>>,
    ttls: Mutex<HashMap<String, u64>>,
    connect_delay: Duration,
    connected: AtomicBool,
    failing: AtomicBool,
    gets: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Self::with_connect_delay(Duration::ZERO)
    }

    pub fn with_connect_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(HashMap::new()),
            ttls: Mutex::new(HashMap::new()),
            connect_delay: delay,
            connected: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    /// Wait for the background connect started by the cache service.
    pub async fn wait_connected(&self) {
        for _ in 0..100 {
            if self.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fake store never connected");
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::cache_with_context(
                "injected failure",
                ErrorContext::new().with_source("fake_store"),
            ));
        }
        if !self.is_connected() {
            return Err(Error::cache_with_context(
                "not connected",
                ErrorContext::new().with_source("fake_store"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn connect(&self) -> Result<()> {
        tokio::time::sleep(self.connect_delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::cache_with_context(
                "connection refused",
                ErrorContext::new().with_source("fake_store"),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check()?;
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self.ttls.lock().unwrap().insert(key.to_string(), ttl_secs);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
