//! Retry policy for transient call failures.
//!
//! Decides per failed attempt whether to try again and how long to wait. Retries run
//! sequentially inside one logical call; the caller (normally a circuit breaker) only ever
//! sees the final outcome.

use crate::{Error, ErrorContext, Result};
use rand::Rng;
use reqwest::Method;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Status codes retried for every method unless configured otherwise.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 7] = [408, 413, 429, 500, 502, 503, 504];

const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 60_000;

/// Maps a 1-based retry number to the delay before that retry.
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Exponential backoff: `2^retry * 100ms` plus up to 20% random jitter.
pub fn exponential_delay(retry: u32) -> Duration {
    let delay_ms = BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(retry))
        .min(MAX_DELAY_MS);

    let jitter_range = delay_ms / 5;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms + jitter)
}

/// Outcome of evaluating one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    GiveUp,
}

/// Per-call bookkeeping, dropped once the call resolves.
#[derive(Debug, Default)]
struct RetryContext {
    attempt: u32,
    last_error: Option<String>,
    next_delay: Duration,
}

#[derive(Clone)]
pub struct RetryPolicy {
    retries: u32,
    retry_status_codes: Vec<u16>,
    delay: RetryDelayFn,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("retry_status_codes", &self.retry_status_codes)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            delay: Arc::new(exponential_delay),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_status_codes: Vec<u16>) -> Result<Self> {
        if let Some(bad) = retry_status_codes
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(Error::configuration_with_context(
                "retry status code out of range",
                ErrorContext::new()
                    .with_field_path("client.retry_status_codes")
                    .with_details(format!("expected 100..=599, got {}", bad))
                    .with_source("retry_policy"),
            ));
        }
        Ok(Self {
            retries,
            retry_status_codes,
            ..Self::default()
        })
    }

    /// Replace the backoff function. It receives the 1-based retry number.
    pub fn with_delay_fn(mut self, delay: RetryDelayFn) -> Self {
        self.delay = delay;
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_status_codes(&self) -> &[u16] {
        &self.retry_status_codes
    }

    /// Network failures always retry; idempotent methods also retry 5xx and other
    /// response-less failures. Transport timeouts are not retried.
    pub fn is_retryable(&self, method: &Method, err: &Error) -> bool {
        match err {
            Error::Transport(t) => t.is_network() || (!t.is_timeout() && method.is_idempotent()),
            Error::Remote { status, .. } => {
                self.retry_status_codes.contains(status)
                    || (method.is_idempotent() && (500..=599).contains(status))
            }
            _ => false,
        }
    }

    /// Decide what to do after a failed attempt.
    ///
    /// - `retries_done` counts retries already made (0 after the initial attempt fails).
    pub fn decide(&self, method: &Method, err: &Error, retries_done: u32) -> Decision {
        if retries_done >= self.retries || !self.is_retryable(method, err) {
            return Decision::GiveUp;
        }
        Decision::Retry {
            delay: (self.delay)(retries_done + 1),
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or retries run out.
    ///
    /// `op` receives the 0-based attempt number. The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, method: &Method, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut ctx = RetryContext::default();
        loop {
            match op(ctx.attempt).await {
                Ok(value) => {
                    if ctx.attempt > 0 {
                        debug!(
                            attempts = ctx.attempt + 1,
                            last_error = ctx.last_error.as_deref().unwrap_or(""),
                            "call recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => match self.decide(method, &err, ctx.attempt) {
                    Decision::Retry { delay } => {
                        ctx.next_delay = delay;
                        ctx.last_error = Some(err.to_string());
                        warn!(
                            method = %method,
                            attempt = ctx.attempt + 1,
                            delay_ms = ctx.next_delay.as_millis() as u64,
                            error = %err,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(ctx.next_delay).await;
                        ctx.attempt += 1;
                    }
                    Decision::GiveUp => {
                        if ctx.attempt > 0 {
                            debug!(
                                method = %method,
                                attempts = ctx.attempt + 1,
                                error = %err,
                                "giving up"
                            );
                        }
                        return Err(err);
                    }
                },
            }
        }
    }
}
