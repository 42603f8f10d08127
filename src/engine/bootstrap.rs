//! Readies an origin account for ordered submission: fund it through the
//! faucet, then wait until the read path shows a usable balance.

use crate::engine::poll::{ConfirmationPoller, PollPolicy, Probe};
use crate::engine::retry::{
    duration_to_millis, Exhaustion, RetryPolicy, RetryingAction, FUND_RETRY,
};
use crate::horizon::client::{AccountReader, FundingEndpoint};
use crate::horizon::identity::Identity;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Native balance an origin must show before it is used.
pub const DEFAULT_FUNDER_MIN_BALANCE: f64 = 10_000.0;

pub const DEFAULT_BOOTSTRAP_POLL: PollPolicy = PollPolicy {
    timeout: Duration::from_secs(20),
    interval: Duration::from_secs(1),
};

pub struct FunderBootstrap {
    funder: Arc<dyn FundingEndpoint>,
    reader: Arc<dyn AccountReader>,
    retry: RetryPolicy,
    poller: ConfirmationPoller,
    min_balance: f64,
}

impl FunderBootstrap {
    pub fn new(funder: Arc<dyn FundingEndpoint>, reader: Arc<dyn AccountReader>) -> Self {
        Self {
            funder,
            reader,
            retry: RetryPolicy::default(),
            poller: ConfirmationPoller::new(DEFAULT_BOOTSTRAP_POLL),
            min_balance: DEFAULT_FUNDER_MIN_BALANCE,
        }
    }

    /// Exhausted funding always propagates; an origin that was never funded
    /// cannot be skipped.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            on_exhaustion: Exhaustion::Propagate,
            ..policy
        };
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poller = ConfirmationPoller::new(policy);
        self
    }

    pub fn with_min_balance(mut self, min_balance: f64) -> Self {
        self.min_balance = min_balance;
        self
    }

    /// Funds `origin` and returns the faucet's transaction hash once the
    /// account holds at least the minimum native balance.
    pub async fn bootstrap(&self, origin: &Identity) -> Result<String> {
        let public_id = origin.public_id.as_str();
        tracing::info!(origin = public_id, "funding origin via faucet");

        let funder = &self.funder;
        let outcome = RetryingAction::new(self.retry, &FUND_RETRY)
            .run(move |_| funder.fund(public_id))
            .await
            .with_context(|| format!("failed to fund origin {public_id}"))?;
        let Some(tx_hash) = outcome.into_value() else {
            bail!("funding origin {public_id} was skipped");
        };

        let reader = &self.reader;
        let min_balance = self.min_balance;
        let ready = self
            .poller
            .wait(move || async move {
                let account = reader.load_account(public_id).await?;
                let ready = account
                    .native_amount()
                    .is_some_and(|amount| amount >= min_balance);
                Ok(Probe::from_bool(ready))
            })
            .await?;
        if !ready {
            bail!(
                "origin {public_id} did not reach a balance of {min_balance} within {}ms",
                duration_to_millis(self.poller.policy().timeout)
            );
        }

        tracing::info!(origin = public_id, tx_hash = %tx_hash, "origin funded");
        Ok(tx_hash)
    }

    /// Bootstraps each origin in turn; the first failure stops the rest.
    pub async fn bootstrap_all(&self, origins: &[Identity]) -> Result<Vec<String>> {
        let mut hashes = Vec::with_capacity(origins.len());
        for origin in origins {
            hashes.push(self.bootstrap(origin).await?);
        }
        Ok(hashes)
    }
}
