//! Poll-wait engine
//!
//! Repeatedly refreshes an object until it reports one of a set of target
//! labels, a failure label, or the deadline passes. The caller supplies the
//! refresh function, so the same loop serves readiness waits, attach polls and
//! delete waits.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use topoflow_config::PollConfig;

/// Poll timing shared by all waits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between two probes
    pub delay: Duration,
    /// Lower bound for the delay
    pub min_delay: Duration,
    /// Timeout used when the caller does not pass one
    pub default_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            min_delay: Duration::from_secs(3),
            default_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.delay_ms),
            min_delay: Duration::from_millis(config.min_delay_ms),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
        }
    }
}

/// What to wait for and for how long
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub failure: Vec<String>,
    pub timeout: Duration,
    pub delay: Duration,
    pub min_delay: Duration,
    /// Treat a vanished object as the expected end state
    pub gone_is_success: bool,
}

impl WaitSpec {
    pub fn new(target: Vec<String>, settings: &PollSettings, timeout: Duration) -> Self {
        Self {
            pending: Vec::new(),
            target,
            failure: Vec::new(),
            timeout,
            delay: settings.delay,
            min_delay: settings.min_delay,
            gone_is_success: false,
        }
    }

    pub fn pending(mut self, labels: Vec<String>) -> Self {
        self.pending = labels;
        self
    }

    pub fn failure(mut self, labels: Vec<String>) -> Self {
        self.failure = labels;
        self
    }

    pub fn gone_is_success(mut self) -> Self {
        self.gone_is_success = true;
        self
    }

    fn interval(&self) -> Duration {
        self.delay.max(self.min_delay)
    }
}

/// One observation returned by a refresh function
#[derive(Debug, Clone)]
pub struct Probe<T> {
    pub value: T,
    pub label: String,
    /// Error text the remote side recorded on the object
    pub error: Option<String>,
}

impl<T> Probe<T> {
    pub fn new(value: T, label: impl Into<String>) -> Self {
        Self {
            value,
            label: label.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

/// A refresh attempt that produced no observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The object does not exist (any more)
    NotFound(String),
    /// Network or parse failure; retried until the deadline
    Transient(String),
}

#[derive(Debug)]
pub enum WaitOutcome<T> {
    Reached(Probe<T>),
    /// The object disappeared during a wait that accepts that
    Gone,
}

#[derive(Error, Debug)]
pub enum WaitError<T: fmt::Debug> {
    #[error("entered a failure state")]
    Failure { probe: Probe<T> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        /// Last successful observation
        last: Option<Probe<T>>,
        /// Last refresh error, when the final attempts failed
        last_error: Option<String>,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Upper bound for a deadline, thirty years out
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline `timeout` after `start`, saturating for huge timeouts such as
/// `Duration::MAX`
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Refresh until the target is reached.
///
/// The first probe runs immediately. Between probes the loop sleeps
/// `max(delay, min_delay)`, never past the deadline, and returns `Cancelled`
/// as soon as `cancel` fires. A refresh still running at the deadline is
/// dropped and the wait times out.
pub async fn wait_for<T, F, Fut>(
    cancel: &CancellationToken,
    spec: &WaitSpec,
    mut refresh: F,
) -> Result<WaitOutcome<T>, WaitError<T>>
where
    T: fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, ProbeError>>,
{
    let started = Instant::now();
    let deadline = deadline_after(started, spec.timeout);
    let interval = spec.interval();
    let mut last: Option<Probe<T>> = None;
    let mut last_error: Option<String> = None;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            result = refresh() => result,
            _ = sleep_until(deadline) => {
                tracing::debug!(attempt, "refresh still running at the deadline");
                return Err(WaitError::Timeout {
                    elapsed: Instant::now() - started,
                    last,
                    last_error,
                });
            }
        };

        match result {
            Ok(probe) => {
                if spec.target.contains(&probe.label) {
                    tracing::debug!(attempt, label = %probe.label, "target state reached");
                    return Ok(WaitOutcome::Reached(probe));
                }
                if spec.failure.contains(&probe.label) {
                    tracing::warn!(attempt, label = %probe.label, "failure state reached");
                    return Err(WaitError::Failure { probe });
                }
                if spec.pending.is_empty() || spec.pending.contains(&probe.label) {
                    tracing::debug!(attempt, label = %probe.label, "still pending");
                } else {
                    tracing::debug!(attempt, label = %probe.label, "unexpected state, still waiting");
                }
                last_error = None;
                last = Some(probe);
            }
            Err(ProbeError::NotFound(what)) => {
                if spec.gone_is_success {
                    tracing::debug!(attempt, "object gone: {}", what);
                    return Ok(WaitOutcome::Gone);
                }
                return Err(WaitError::NotFound(what));
            }
            Err(ProbeError::Transient(message)) => {
                tracing::debug!(attempt, "refresh failed, retrying: {}", message);
                last_error = Some(message);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Timeout {
                elapsed: now - started,
                last,
                last_error,
            });
        }

        let pause = interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            _ = sleep(pause) => {}
        }
    }
}
