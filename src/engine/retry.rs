//! Bounded retry loop shared by every fallible network action, together with
//! the error classification and the log labels that keep retry reporting
//! consistent across operations.

use crate::horizon::client::HorizonError;
use crate::runtime::telemetry::Telemetry;
use crate::transport::TransportHandle;
use anyhow::{bail, Error, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;

macro_rules! log_with_unit {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(unit) = $ctx.unit {
            tracing::$level!(unit, $($rest)*);
        } else {
            tracing::$level!($($rest)*);
        }
    }};
}

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Explicit rejection; retrying cannot help.
    Terminal,
    /// Timeout, reset, unreachable. The transport is rebuilt before retrying.
    RetryableTransport,
    RetryableGeneric,
}

/// What to do once `max_attempts` is used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// Return the last error.
    Propagate,
    /// Return [`RetryOutcome::Skipped`] so the caller can record and move on.
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff_base: Duration,
    pub on_exhaustion: Exhaustion,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            on_exhaustion: Exhaustion::Propagate,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        Ok(())
    }

    /// Linear backoff: the wait after attempt `n` is `backoff_base * n`.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Completed { value: T, attempts: usize },
    Skipped { attempts: usize, last_error: Error },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryOutcome::Completed { attempts, .. } | RetryOutcome::Skipped { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Completed { value, .. } => Some(value),
            RetryOutcome::Skipped { .. } => None,
        }
    }
}

/// Context attached to every error [`RetryingAction::run`] returns, carrying
/// how many attempts were spent before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptsSpent {
    pub attempts: usize,
    /// `false` when a terminal error stopped the loop early.
    pub exhausted: bool,
}

impl fmt::Display for AttemptsSpent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exhausted {
            write!(f, "gave up after {} attempts", self.attempts)
        } else {
            write!(f, "rejected on attempt {}", self.attempts)
        }
    }
}

/// Attempts recorded on an error returned by [`RetryingAction::run`].
pub fn attempts_spent(err: &Error) -> Option<usize> {
    err.downcast_ref::<AttemptsSpent>().map(|spent| spent.attempts)
}

/// Log labels describing one kind of action.
#[derive(Clone, Copy)]
pub struct RetryLabels {
    pub retry: &'static str,
    pub exhausted: &'static str,
    pub skipped: &'static str,
    pub terminal: &'static str,
}

pub const FUND_RETRY: RetryLabels = RetryLabels {
    retry: "funding request failed; retrying",
    exhausted: "funding request exhausted retries",
    skipped: "funding request exhausted retries; skipping unit",
    terminal: "funding request rejected; not retrying",
};

pub const SEQUENCE_READ_RETRY: RetryLabels = RetryLabels {
    retry: "sequence read failed; retrying",
    exhausted: "sequence read exhausted retries",
    skipped: "sequence read exhausted retries; skipping chunk",
    terminal: "sequence read rejected; not retrying",
};

/// Default classification over [`HorizonError`]; anything unknown is generic.
pub fn classify_error(err: &Error) -> ErrorClass {
    match err.downcast_ref::<HorizonError>() {
        Some(HorizonError::Rejected { .. }) => ErrorClass::Terminal,
        Some(HorizonError::Timeout { .. }) | Some(HorizonError::Transport { .. }) => {
            ErrorClass::RetryableTransport
        }
        _ => ErrorClass::RetryableGeneric,
    }
}

/// One retrying invocation site: policy, labels, optional unit index for log
/// context, and the transport to rotate on transport-class failures.
#[derive(Clone, Copy)]
pub struct RetryingAction<'a> {
    policy: RetryPolicy,
    labels: &'a RetryLabels,
    unit: Option<usize>,
    transport: Option<&'a TransportHandle>,
    telemetry: Option<&'a Telemetry>,
    classify: fn(&Error) -> ErrorClass,
}

impl<'a> RetryingAction<'a> {
    pub fn new(policy: RetryPolicy, labels: &'a RetryLabels) -> Self {
        Self {
            policy,
            labels,
            unit: None,
            transport: None,
            telemetry: None,
            classify: classify_error,
        }
    }

    pub fn for_unit(mut self, unit: usize) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_transport(mut self, transport: &'a TransportHandle) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_telemetry(mut self, telemetry: &'a Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_classifier(mut self, classify: fn(&Error) -> ErrorClass) -> Self {
        self.classify = classify;
        self
    }

    /// Runs `operation` (which receives the 1-based attempt number) until it
    /// succeeds, fails terminally, or the policy's attempts are used up.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match operation(attempt).await {
                Ok(value) => {
                    return Ok(RetryOutcome::Completed {
                        value,
                        attempts: attempt,
                    })
                }
                Err(err) => err,
            };

            let class = (self.classify)(&err);
            if class == ErrorClass::Terminal {
                log_with_unit!(warn, self, attempt, error = %err, "{}", self.labels.terminal);
                return Err(err.context(AttemptsSpent {
                    attempts: attempt,
                    exhausted: false,
                }));
            }

            if attempt >= max_attempts {
                return match self.policy.on_exhaustion {
                    Exhaustion::Propagate => {
                        log_with_unit!(error, self, attempt, error = %err, "{}", self.labels.exhausted);
                        Err(err.context(AttemptsSpent {
                            attempts: attempt,
                            exhausted: true,
                        }))
                    }
                    Exhaustion::Skip => {
                        log_with_unit!(warn, self, attempt, error = %err, "{}", self.labels.skipped);
                        Ok(RetryOutcome::Skipped {
                            attempts: attempt,
                            last_error: err,
                        })
                    }
                };
            }

            if class == ErrorClass::RetryableTransport {
                self.rotate_transport(attempt);
            }

            if let Some(telemetry) = self.telemetry {
                telemetry.record_retry();
            }
            let backoff = self.policy.backoff_delay(attempt);
            log_with_unit!(
                warn,
                self,
                attempt,
                backoff_ms = duration_to_millis(backoff),
                error = %err,
                "{}",
                self.labels.retry
            );
            pause(backoff).await;
        }
    }

    fn rotate_transport(&self, attempt: usize) {
        let Some(transport) = self.transport else {
            return;
        };
        match transport.rotate() {
            Ok(_) => {
                if let Some(telemetry) = self.telemetry {
                    telemetry.record_rotation();
                }
            }
            Err(err) => {
                log_with_unit!(warn, self, attempt, error = %err, "failed to rotate transport; reusing current client");
            }
        }
    }
}

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
pub(crate) fn duration_to_millis(delay: Duration) -> u64 {
    delay.as_millis().min(u128::from(u64::MAX)) as u64
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        yield_now().await;
    } else {
        sleep(delay).await;
    }
}
