//! Fixed-interval polling of an eventually consistent read endpoint.

use crate::horizon::is_not_found;
use anyhow::{bail, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            interval: Duration::from_millis(1_500),
        }
    }
}

impl PollPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("poll interval must be greater than 0");
        }
        Ok(())
    }
}

/// Result of one read against the endpoint being polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ready,
    Pending,
}

impl Probe {
    pub fn from_bool(ready: bool) -> Self {
        if ready {
            Probe::Ready
        } else {
            Probe::Pending
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPoller {
    policy: PollPolicy,
}

impl ConfirmationPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Calls `check` until it reports [`Probe::Ready`] (`Ok(true)`) or the
    /// deadline passes (`Ok(false)`). A not-found answer counts as pending;
    /// any other error is returned as is. `check` always runs at least once.
    pub async fn wait<F, Fut>(&self, mut check: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe>>,
    {
        let deadline = Instant::now() + self.policy.timeout;

        loop {
            match check().await {
                Ok(Probe::Ready) => return Ok(true),
                Ok(Probe::Pending) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            // never sleep past the deadline; one last check happens at it
            let remaining = deadline - now;
            sleep(self.policy.interval.min(remaining)).await;
        }
    }
}
