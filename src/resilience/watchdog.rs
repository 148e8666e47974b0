//! Process-wide consecutive-failure watchdog.
//!
//! Per-destination breakers cannot see a cascade that spans every dependency. The watchdog
//! counts consecutive failures of whatever operations the application deems critical and
//! escalates once the count reaches a threshold. It never wires itself into the client or
//! cache; callers report outcomes explicitly.
//!
//! The counter itself only reports. Whether reaching the threshold terminates the process
//! is decided by the entrypoint through [`FailureWatchdog::escalate`].

use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{error, info, warn};

/// Exit status used when the watchdog terminates the process.
pub const EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub threshold: u32,
    pub terminate_process_on_threshold: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            terminate_process_on_threshold: true,
        }
    }
}

impl WatchdogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Library-embedded mode: report the threshold as an error instead of exiting.
    pub fn with_terminate(mut self, terminate: bool) -> Self {
        self.terminate_process_on_threshold = terminate;
        self
    }

    /// Defaults overridden by:
    /// - `CASCADE_GUARD_WATCHDOG_THRESHOLD`
    /// - `CASCADE_GUARD_WATCHDOG_TERMINATE` (`0`/`false` disables process exit)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(t) = std::env::var("CASCADE_GUARD_WATCHDOG_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            cfg.threshold = t;
        }
        if let Ok(v) = std::env::var("CASCADE_GUARD_WATCHDOG_TERMINATE") {
            cfg.terminate_process_on_threshold = !matches!(v.as_str(), "0" | "false" | "no");
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::configuration_with_context(
                "watchdog threshold must be at least 1",
                ErrorContext::new()
                    .with_field_path("watchdog.threshold")
                    .with_source("failure_watchdog"),
            ));
        }
        Ok(())
    }
}

pub struct FailureWatchdog {
    config: WatchdogConfig,
    consecutive_failures: AtomicU32,
}

impl FailureWatchdog {
    pub fn new(config: WatchdogConfig) -> Result<Self> {
        config.validate()?;
        info!(
            threshold = config.threshold,
            terminate = config.terminate_process_on_threshold,
            "failure watchdog initialized"
        );
        Ok(Self {
            config,
            consecutive_failures: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Record a success; re-arms the watchdog.
    pub fn handle_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
        if previous > 0 {
            info!(previous, "success observed, consecutive failure count reset");
        }
    }

    /// Record a failure.
    ///
    /// Returns [`Error::FailureThreshold`] exactly when this failure brings the count to the
    /// threshold. Further failures keep counting but do not report again until
    /// [`handle_success`](Self::handle_success) re-arms the watchdog.
    pub fn handle_failure(&self) -> Result<()> {
        let previous = self
            .consecutive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n);
        let consecutive = previous.saturating_add(1);
        let threshold = self.config.threshold;

        warn!(consecutive, threshold, "consecutive failure recorded");

        if consecutive == threshold {
            error!(threshold, "failure threshold reached");
            return Err(Error::FailureThreshold {
                threshold,
                consecutive,
            });
        }
        Ok(())
    }

    /// Await `fut` and report its outcome.
    ///
    /// On failure the original error is returned unless this failure crossed the threshold,
    /// in which case the threshold error replaces it.
    pub async fn observe<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match fut.await {
            Ok(value) => {
                self.handle_success();
                Ok(value)
            }
            Err(err) => {
                self.handle_failure()?;
                Err(err)
            }
        }
    }

    /// Entrypoint hook for a watchdog error.
    ///
    /// In terminate mode a fatal error exits the process with [`EXIT_CODE`]; otherwise the
    /// error is handed back for the caller to raise.
    pub fn escalate(&self, err: Error) -> Error {
        if err.is_fatal() && self.config.terminate_process_on_threshold {
            error!(error = %err, exit_code = EXIT_CODE, "terminating process");
            std::process::exit(EXIT_CODE);
        }
        err
    }

    /// [`handle_failure`](Self::handle_failure) followed by [`escalate`](Self::escalate).
    pub fn handle_failure_or_exit(&self) -> Result<()> {
        self.handle_failure().map_err(|e| self.escalate(e))
    }
}

static GLOBAL_WATCHDOG: Lazy<FailureWatchdog> = Lazy::new(|| {
    let config = WatchdogConfig::from_env();
    FailureWatchdog::new(config).unwrap_or_else(|e| {
        warn!(error = %e, "invalid watchdog environment, using defaults");
        FailureWatchdog {
            config: WatchdogConfig::default(),
            consecutive_failures: AtomicU32::new(0),
        }
    })
});

/// Process-wide watchdog configured from the environment on first use.
pub fn global_watchdog() -> &'static FailureWatchdog {
    &GLOBAL_WATCHDOG
}
