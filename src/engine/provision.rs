//! The provision-and-confirm unit task: fund a fresh identity, wait until the
//! read path observes the balance, then take balance readings on every
//! configured network.

use crate::engine::poll::{ConfirmationPoller, PollPolicy, Probe};
use crate::engine::results::ResultLedger;
use crate::engine::retry::{
    attempts_spent, duration_to_millis, RetryOutcome, RetryPolicy, RetryingAction, FUND_RETRY,
};
use crate::engine::unit::{BalanceReading, Balances, UnitRecord, UnitState};
use crate::horizon::client::{is_not_found, AccountReader, FundingEndpoint};
use crate::horizon::identity::IdentitySource;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use crate::transport::TransportHandle;
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;

/// What a confirmation read failure (other than not-found) does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmFaultPolicy {
    /// Record the unit as failed; siblings keep going.
    FailUnit,
    /// Record the unit as failed and stop scheduling new batches.
    AbortRun,
}

/// An additional Horizon instance read after confirmation.
#[derive(Clone)]
pub struct ProbeNetwork {
    pub name: String,
    pub reader: Arc<dyn AccountReader>,
}

pub struct ProvisionerParams {
    pub funder: Arc<dyn FundingEndpoint>,
    pub reader: Arc<dyn AccountReader>,
    pub network_name: String,
    pub probes: Vec<ProbeNetwork>,
    pub identities: Arc<dyn IdentitySource>,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub min_balance: f64,
    pub confirm_fault: ConfirmFaultPolicy,
    pub record_secrets: bool,
    pub transport: Option<Arc<TransportHandle>>,
    pub telemetry: Arc<Telemetry>,
    pub ledger: Arc<ResultLedger>,
    pub fatal: FatalErrorHandler,
}

pub struct Provisioner {
    funder: Arc<dyn FundingEndpoint>,
    reader: Arc<dyn AccountReader>,
    network_name: String,
    probes: Vec<ProbeNetwork>,
    identities: Arc<dyn IdentitySource>,
    retry: RetryPolicy,
    poller: ConfirmationPoller,
    min_balance: f64,
    confirm_fault: ConfirmFaultPolicy,
    record_secrets: bool,
    transport: Option<Arc<TransportHandle>>,
    telemetry: Arc<Telemetry>,
    ledger: Arc<ResultLedger>,
    fatal: FatalErrorHandler,
}

impl Provisioner {
    pub fn new(params: ProvisionerParams) -> Self {
        Self {
            funder: params.funder,
            reader: params.reader,
            network_name: params.network_name,
            probes: params.probes,
            identities: params.identities,
            retry: params.retry,
            poller: ConfirmationPoller::new(params.poll),
            min_balance: params.min_balance,
            confirm_fault: params.confirm_fault,
            record_secrets: params.record_secrets,
            transport: params.transport,
            telemetry: params.telemetry,
            ledger: params.ledger,
            fatal: params.fatal,
        }
    }

    pub fn ledger(&self) -> &Arc<ResultLedger> {
        &self.ledger
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Provisions unit `idx` and appends its record to the ledger.
    ///
    /// Returns `Ok(true)` once the funding is observed, `Ok(false)` when the
    /// unit timed out or was skipped after exhausting retries, and `Err` when
    /// funding or confirmation failed outright.
    pub async fn provision(&self, idx: usize) -> Result<bool> {
        let identity = self.identities.generate(idx);
        let public_id = identity.public_id.as_str();
        let mut record = UnitRecord::new(idx, public_id);
        if self.record_secrets {
            record = record.with_secret(identity.secret.clone());
        }

        tracing::info!(unit = idx, public_id, "requesting funding");
        self.telemetry.record_funding_request();

        let mut action = RetryingAction::new(self.retry, &FUND_RETRY)
            .for_unit(idx)
            .with_telemetry(&self.telemetry);
        if let Some(transport) = &self.transport {
            action = action.with_transport(transport);
        }

        let funder = &self.funder;
        let funded = action.run(move |_| funder.fund(public_id)).await;

        let tx_hash = match funded {
            Ok(RetryOutcome::Completed { value, attempts }) => {
                record.mark_funded(value.clone(), attempts);
                value
            }
            Ok(RetryOutcome::Skipped {
                attempts,
                last_error,
            }) => {
                record.create_attempts = attempts;
                record.mark_failed(format!("funding skipped: {last_error:#}"));
                self.finish_failed(idx, &record);
                self.ledger.append(record)?;
                return Ok(false);
            }
            Err(err) => {
                record.create_attempts = attempts_spent(&err).unwrap_or(0);
                record.mark_failed(format!("funding failed: {err:#}"));
                self.finish_failed(idx, &record);
                self.ledger.append(record)?;
                return Err(err.context(format!("unit {idx} funding failed")));
            }
        };

        self.telemetry.record_funded();
        tracing::info!(
            unit = idx,
            public_id,
            tx_hash = %tx_hash,
            attempts = record.create_attempts,
            "funded"
        );

        match self.confirm(public_id).await {
            Ok(true) => {
                let balances = self.read_balances(public_id).await;
                record.mark_confirmed(balances);
                self.telemetry.record_confirmed();
                tracing::info!(unit = idx, public_id, "confirmed");
                self.ledger.append(record)?;
                Ok(true)
            }
            Ok(false) => {
                record.mark_timed_out();
                self.telemetry.record_timed_out();
                tracing::warn!(
                    unit = idx,
                    public_id,
                    timeout_ms = duration_to_millis(self.poller.policy().timeout),
                    "confirmation timed out"
                );
                self.ledger.append(record)?;
                Ok(false)
            }
            Err(err) => {
                record.mark_failed(format!("confirmation failed: {err:#}"));
                self.finish_failed(idx, &record);
                self.ledger.append(record)?;
                let err = err.context(format!("unit {idx} confirmation failed"));
                match self.confirm_fault {
                    ConfirmFaultPolicy::FailUnit => Err(err),
                    ConfirmFaultPolicy::AbortRun => {
                        Err(self.fatal.trigger("confirmation read failed", err))
                    }
                }
            }
        }
    }

    async fn confirm(&self, public_id: &str) -> Result<bool> {
        let reader = &self.reader;
        let min_balance = self.min_balance;
        self.poller
            .wait(move || async move {
                let account = reader.load_account(public_id).await?;
                let ready = account
                    .native_amount()
                    .is_some_and(|amount| amount > 0.0 && amount >= min_balance);
                Ok(Probe::from_bool(ready))
            })
            .await
    }

    /// One read per network, in parallel. Read failures are recorded in the
    /// map rather than failing the unit.
    async fn read_balances(&self, public_id: &str) -> Balances {
        let primary = (self.network_name.as_str(), &self.reader);
        let networks = std::iter::once(primary).chain(
            self.probes
                .iter()
                .map(|probe| (probe.name.as_str(), &probe.reader)),
        );

        let reads = networks.map(|(name, reader)| async move {
            let reading = match reader.load_account(public_id).await {
                Ok(account) => match account.native_balance() {
                    Some(amount) => BalanceReading::Native {
                        amount: amount.to_owned(),
                    },
                    None => BalanceReading::Absent,
                },
                Err(err) if is_not_found(&err) => BalanceReading::Absent,
                Err(err) => {
                    tracing::debug!(network = name, error = %err, "balance read failed");
                    BalanceReading::Error {
                        message: format!("{err:#}"),
                    }
                }
            };
            (name.to_owned(), reading)
        });

        join_all(reads).await.into_iter().collect()
    }

    fn finish_failed(&self, idx: usize, record: &UnitRecord) {
        self.telemetry.record_failed();
        if let UnitState::Failed { reason } = &record.state {
            tracing::warn!(unit = idx, public_id = %record.public_id, reason = %reason, "failed");
        }
    }
}

impl std::fmt::Debug for ProbeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeNetwork").field("name", &self.name).finish()
    }
}
