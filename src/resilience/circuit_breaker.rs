//! Circuit breaker guarding one protected operation.
//!
//! # States
//! - Closed: calls pass through, outcomes feed a rolling error window
//! - Open: calls resolve to the fallback without touching the dependency
//! - Half-Open: a single trial call probes whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open:      error rate >= threshold and volume >= minimum within the window
//! Open → Half-Open:   first call after reset_timeout (becomes the trial)
//! Half-Open → Closed: trial succeeds (counters reset)
//! Half-Open → Open:   trial fails or times out (reset clock restarts)
//! ```

use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Returns `true` for errors that must not count against the dependency.
pub type ErrorFilter = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Excludes explicit rate-limit responses (HTTP 429) from failure accounting.
pub fn rate_limited_filter() -> ErrorFilter {
    Arc::new(|err: &Error| err.status() == Some(429))
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (1..=100) at which a closed breaker opens.
    pub error_threshold_percentage: u8,
    /// Samples required in the window before the error rate is trusted.
    pub minimum_volume: u32,
    pub reset_timeout: Duration,
    /// Per-call deadline; `None` disables it.
    pub timeout: Option<Duration>,
    pub rolling_window: Duration,
    pub window_buckets: u32,
    pub error_filter: Option<ErrorFilter>,
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("error_threshold_percentage", &self.error_threshold_percentage)
            .field("minimum_volume", &self.minimum_volume)
            .field("reset_timeout", &self.reset_timeout)
            .field("timeout", &self.timeout)
            .field("rolling_window", &self.rolling_window)
            .field("window_buckets", &self.window_buckets)
            .field("error_filter", &self.error_filter.is_some())
            .finish()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: 50,
            minimum_volume: 5,
            reset_timeout: Duration::from_secs(30),
            timeout: None,
            rolling_window: Duration::from_secs(10),
            window_buckets: 10,
            error_filter: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_threshold_percentage(mut self, pct: u8) -> Self {
        self.error_threshold_percentage = pct;
        self
    }

    pub fn with_minimum_volume(mut self, volume: u32) -> Self {
        self.minimum_volume = volume;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_rolling_window(mut self, window: Duration, buckets: u32) -> Self {
        self.rolling_window = window;
        self.window_buckets = buckets;
        self
    }

    pub fn with_error_filter(mut self, filter: ErrorFilter) -> Self {
        self.error_filter = Some(filter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, details: String| {
            Err(Error::configuration_with_context(
                "invalid circuit breaker configuration",
                ErrorContext::new()
                    .with_field_path(format!("breaker.{}", field))
                    .with_details(details)
                    .with_source("circuit_breaker"),
            ))
        };

        if self.error_threshold_percentage == 0 || self.error_threshold_percentage > 100 {
            return invalid(
                "error_threshold_percentage",
                format!("expected 1..=100, got {}", self.error_threshold_percentage),
            );
        }
        if self.reset_timeout.is_zero() {
            return invalid("reset_timeout", "must be greater than zero".into());
        }
        if matches!(self.timeout, Some(t) if t.is_zero()) {
            return invalid("timeout", "must be greater than zero when set".into());
        }
        if self.window_buckets == 0 {
            return invalid("window_buckets", "must be at least 1".into());
        }
        if self.rolling_window < Duration::from_millis(self.window_buckets as u64) {
            return invalid(
                "rolling_window",
                format!(
                    "window of {:?} is too short for {} buckets",
                    self.rolling_window, self.window_buckets
                ),
            );
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker; taking it has no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub successes: u32,
    pub failures: u32,
    /// Failure percentage over the current window (0.0 when empty).
    pub error_rate: f64,
    /// Calls answered with the fallback since creation.
    pub rejected: u64,
    pub timeouts: u64,
    pub last_transition: SystemTime,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub error_threshold_percentage: u8,
    pub reset_timeout_ms: u64,
}

#[derive(Debug)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

#[derive(Debug)]
struct RollingWindow {
    buckets: VecDeque<Bucket>,
    span: Duration,
    bucket_len: Duration,
}

impl RollingWindow {
    fn new(span: Duration, buckets: u32) -> Self {
        Self {
            buckets: VecDeque::with_capacity(buckets as usize),
            span,
            bucket_len: span / buckets.max(1),
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.duration_since(front.started) >= self.span {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool) {
        self.expire(now);
        let needs_bucket = match self.buckets.back() {
            Some(b) => now.duration_since(b.started) >= self.bucket_len,
            None => true,
        };
        if needs_bucket {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }
        if let Some(b) = self.buckets.back_mut() {
            if success {
                b.successes = b.successes.saturating_add(1);
            } else {
                b.failures = b.failures.saturating_add(1);
            }
        }
    }

    /// (successes, failures) for buckets still inside the window.
    fn totals(&self, now: Instant) -> (u32, u32) {
        self.buckets
            .iter()
            .filter(|b| now.duration_since(b.started) < self.span)
            .fold((0u32, 0u32), |(s, f), b| {
                (s.saturating_add(b.successes), f.saturating_add(b.failures))
            })
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

fn error_rate(successes: u32, failures: u32) -> f64 {
    let total = successes as u64 + failures as u64;
    if total == 0 {
        0.0
    } else {
        failures as f64 * 100.0 / total as f64
    }
}

#[derive(Debug)]
struct State {
    state: BreakerState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    last_transition: SystemTime,
    trial_in_flight: bool,
    rejected: u64,
    timeouts: u64,
}

impl State {
    fn transition(&mut self, to: BreakerState) {
        self.state = to;
        self.last_transition = SystemTime::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Forward,
    Trial,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

/// Circuit breaker with a rolling error-rate window and single-trial half-open probing.
///
/// All state lives behind one mutex that is never held across an await point.
pub struct CircuitBreaker {
    key: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, cfg: CircuitBreakerConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::from_validated(key, cfg))
    }

    pub(crate) fn from_validated(key: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        let window = RollingWindow::new(cfg.rolling_window, cfg.window_buckets);
        Self {
            key: key.into(),
            cfg,
            state: Mutex::new(State {
                state: BreakerState::Closed,
                window,
                opened_at: None,
                last_transition: SystemTime::now(),
                trial_in_flight: false,
                rejected: 0,
                timeouts: 0,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    // A panic inside a critical section leaves the counters consistent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `Ok(Some(value))` for a real success, `Ok(None)` when the call was answered
    /// with the fallback (open, or half-open with a trial already in flight), and `Err` for
    /// the operation's own failure.
    ///
    /// With a per-call timeout configured, the operation runs on a spawned task. On timeout
    /// the call fails and is counted, but the task is abandoned rather than cancelled and may
    /// still complete in the background.
    pub async fn fire<F, Fut, T>(&self, op: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut permit = match self.admit() {
            Admission::Reject => {
                debug!(circuit = %self.key, "circuit rejecting call, returning fallback");
                return Ok(None);
            }
            admission => Permit {
                breaker: self,
                admission,
                settled: false,
            },
        };

        let result = self.run(op()).await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if self.is_filtered(e) => Outcome::Ignored,
            Err(_) => Outcome::Failure,
        };
        permit.settle(outcome);
        result.map(Some)
    }

    async fn run<Fut, T>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let Some(limit) = self.cfg.timeout else {
            return fut.await;
        };

        let handle = tokio::spawn(fut);
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::runtime_with_context(
                format!("protected operation aborted: {}", join_err),
                ErrorContext::new()
                    .with_details(format!("circuit: {}", self.key))
                    .with_source("circuit_breaker"),
            )),
            Err(_) => {
                self.lock().timeouts += 1;
                warn!(
                    circuit = %self.key,
                    timeout_ms = limit.as_millis() as u64,
                    "protected operation timed out; abandoning it"
                );
                Err(Error::Timeout {
                    key: self.key.clone(),
                    after_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    fn is_filtered(&self, err: &Error) -> bool {
        self.cfg
            .error_filter
            .as_ref()
            .map(|f| f(err))
            .unwrap_or(false)
    }

    fn admit(&self) -> Admission {
        let mut st = self.lock();
        match st.state {
            BreakerState::Closed => Admission::Forward,
            BreakerState::Open => {
                let elapsed = st
                    .opened_at
                    .map(|at| at.elapsed() >= self.cfg.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    st.transition(BreakerState::HalfOpen);
                    st.trial_in_flight = true;
                    info!(circuit = %self.key, "circuit half-open, admitting trial call");
                    Admission::Trial
                } else {
                    st.rejected += 1;
                    Admission::Reject
                }
            }
            BreakerState::HalfOpen => {
                if st.trial_in_flight {
                    st.rejected += 1;
                    Admission::Reject
                } else {
                    st.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn settle(&self, admission: Admission, outcome: Outcome) {
        let mut st = self.lock();
        let now = Instant::now();

        // A manual reset may have closed the breaker while the trial was running.
        let is_trial = admission == Admission::Trial
            && st.state == BreakerState::HalfOpen
            && st.trial_in_flight;

        if is_trial {
            st.trial_in_flight = false;
            match outcome {
                Outcome::Success => {
                    st.window.clear();
                    st.opened_at = None;
                    st.transition(BreakerState::Closed);
                    info!(circuit = %self.key, "trial call succeeded, circuit closed");
                }
                Outcome::Failure => {
                    st.opened_at = Some(now);
                    st.transition(BreakerState::Open);
                    warn!(circuit = %self.key, "trial call failed, circuit re-opened");
                }
                Outcome::Ignored => {
                    debug!(circuit = %self.key, "trial outcome filtered, circuit stays half-open");
                }
            }
            return;
        }

        if st.state != BreakerState::Closed {
            return;
        }

        match outcome {
            Outcome::Success => st.window.record(now, true),
            Outcome::Failure => st.window.record(now, false),
            Outcome::Ignored => return,
        }

        let (successes, failures) = st.window.totals(now);
        let volume = successes.saturating_add(failures);
        let rate = error_rate(successes, failures);
        if failures > 0
            && volume >= self.cfg.minimum_volume
            && rate >= self.cfg.error_threshold_percentage as f64
        {
            st.opened_at = Some(now);
            st.transition(BreakerState::Open);
            warn!(
                circuit = %self.key,
                failures,
                successes,
                error_rate = rate,
                reset_timeout_ms = self.cfg.reset_timeout.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    fn release_trial(&self) {
        let mut st = self.lock();
        if st.state == BreakerState::HalfOpen {
            st.trial_in_flight = false;
        }
    }

    /// Force the breaker closed with empty counters.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.window.clear();
        st.opened_at = None;
        st.trial_in_flight = false;
        if st.state != BreakerState::Closed {
            st.transition(BreakerState::Closed);
        }
        info!(circuit = %self.key, "circuit manually reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        let now = Instant::now();
        let (successes, failures) = st.window.totals(now);
        let open_remaining_ms = match (st.state, st.opened_at) {
            (BreakerState::Open, Some(at)) => {
                let elapsed = now.duration_since(at);
                self.cfg
                    .reset_timeout
                    .checked_sub(elapsed)
                    .map(|d| d.as_millis() as u64)
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            key: self.key.clone(),
            state: st.state,
            successes,
            failures,
            error_rate: error_rate(successes, failures),
            rejected: st.rejected,
            timeouts: st.timeouts,
            last_transition: st.last_transition,
            open_remaining_ms,
            error_threshold_percentage: self.cfg.error_threshold_percentage,
            reset_timeout_ms: self.cfg.reset_timeout.as_millis() as u64,
        }
    }
}

/// Admission held for the duration of one forwarded call.
///
/// If the caller's future is dropped before the outcome is known, a trial slot is handed
/// back so the breaker cannot stay half-open forever.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.admission, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}
