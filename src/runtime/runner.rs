use crate::engine::provision::{ProbeNetwork, Provisioner, ProvisionerParams};
use crate::engine::results::{unexpected_balance, ResultLedger};
use crate::engine::retry::duration_to_millis;
use crate::engine::scheduler::BatchScheduler;
use crate::horizon::client::{FriendbotClient, HorizonClient};
use crate::horizon::identity::{IdentitySource, RandomKeypairs};
use crate::runtime::config::LoadConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::report::{RunReport, RunStatus};
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::transport::{await_ready, TransportHandle};
use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives one provisioning run: transport gate, batches of provision tasks,
/// summary, and the persisted report.
pub struct Runner {
    config: LoadConfig,
    transport: Arc<TransportHandle>,
    friendbot: Arc<FriendbotClient>,
    horizon: Arc<HorizonClient>,
    probes: Vec<(String, Arc<HorizonClient>)>,
    identities: Arc<dyn IdentitySource>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Builds the shared transport and every HTTP client the run needs.
    pub fn from_config(config: LoadConfig) -> Result<Self> {
        let transport = Arc::new(TransportHandle::new(config.transport_options())?);
        let friendbot = Arc::new(FriendbotClient::new(
            config.friendbot_url(),
            transport.clone(),
        ));
        let horizon = Arc::new(HorizonClient::new(config.horizon_url(), transport.clone()));
        let probes = config
            .probe_horizons()
            .iter()
            .map(|probe| {
                (
                    probe.name.clone(),
                    Arc::new(HorizonClient::new(probe.url.as_str(), transport.clone())),
                )
            })
            .collect();

        Ok(Self {
            config,
            transport,
            friendbot,
            horizon,
            probes,
            identities: Arc::new(RandomKeypairs),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_identity_source(mut self, identities: Arc<dyn IdentitySource>) -> Self {
        self.identities = identities;
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Cancelling this token stops new units from starting; the report then
    /// carries [`RunStatus::Interrupted`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs to completion and writes the report to the configured path.
    pub async fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let total = self.config.total_runs();

        if let Some(target) = self.config.proxy_gate_target()? {
            tracing::info!(target = %target, "waiting for transport dependency");
            if let Err(err) = await_ready(&target, self.config.proxy_ready_timeout()).await {
                tracing::error!(error = %err, "transport gate failed; no funding requests sent");
                let report =
                    RunReport::preflight_failed(started_at, started.elapsed(), total, err.to_string());
                report.write_to(self.config.results_path()).await?;
                return Ok(report);
            }
        }

        let telemetry = Arc::new(Telemetry::default());
        let ledger = Arc::new(ResultLedger::new());
        let run_token = self.shutdown.child_token();
        let fatal = FatalErrorHandler::new(run_token.clone());

        let provisioner = Provisioner::new(ProvisionerParams {
            funder: self.friendbot.clone(),
            reader: self.horizon.clone(),
            network_name: self.config.network_name().to_owned(),
            probes: self
                .probes
                .iter()
                .map(|(name, client)| ProbeNetwork {
                    name: name.clone(),
                    reader: client.clone(),
                })
                .collect(),
            identities: self.identities.clone(),
            retry: self.config.retry_policy(),
            poll: self.config.poll_policy(),
            min_balance: self.config.confirm_min_balance(),
            confirm_fault: self.config.confirm_fault(),
            record_secrets: self.config.record_secrets(),
            transport: Some(self.transport.clone()),
            telemetry: telemetry.clone(),
            ledger: ledger.clone(),
            fatal: fatal.clone(),
        });

        let reporter_shutdown = CancellationToken::new();
        let reporter = spawn_metrics_reporter(
            telemetry.clone(),
            reporter_shutdown.clone(),
            self.config.metrics_interval(),
        );

        tracing::info!(
            total,
            batch_size = self.config.batch_size(),
            stagger_ms = duration_to_millis(self.config.per_request_delay()),
            "starting provisioning run"
        );
        let scheduler = BatchScheduler::new(self.config.batch_plan()?, run_token);
        let schedule = scheduler.run(|idx| provisioner.provision(idx)).await;

        reporter_shutdown.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }

        let status = if fatal.is_triggered() {
            RunStatus::Aborted
        } else if self.shutdown.is_cancelled() {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };

        let summary = ledger.summarize(total, unexpected_balance(self.config.network_name()));
        tracing::info!(
            success = summary.success,
            total = summary.total,
            failures = summary.failures,
            anomalies = summary.anomalies,
            skipped = schedule.skipped,
            status = ?status,
            "summary {} of {} succeeded",
            summary.success,
            summary.total
        );
        if !summary.anomalous_units.is_empty() {
            tracing::warn!(units = ?summary.anomalous_units, "funded accounts visible on probe networks");
        }

        let mut report = RunReport::new(started_at, status, started.elapsed(), summary)
            .with_error(fatal.error().map(|err| err.to_string()))
            .with_telemetry(telemetry.snapshot())
            .with_http_metrics("friendbot", self.friendbot.metrics())
            .with_http_metrics(self.config.network_name(), self.horizon.metrics());
        for (name, client) in &self.probes {
            report = report.with_http_metrics(name.as_str(), client.metrics());
        }
        let report = report.with_records(ledger.records());

        report.write_to(self.config.results_path()).await?;
        Ok(report)
    }

    /// Like [`Runner::run`], but a Ctrl-C (SIGINT) stops new units from
    /// starting. In-flight units finish and the report is still written.
    pub async fn run_until_ctrl_c(&self) -> Result<RunReport> {
        self.run_until(signal::ctrl_c()).await
    }

    /// Runs until `interrupt` resolves `Ok`, then cancels like Ctrl-C. An
    /// `Err` from `interrupt` means no signal can arrive; the run continues
    /// uncancelled.
    async fn run_until<F>(&self, interrupt: F) -> Result<RunReport>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            report = &mut run => report,
            signal = interrupt => {
                match signal {
                    Ok(()) => {
                        tracing::info!("Ctrl-C received; letting in-flight units finish");
                        self.shutdown.cancel();
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "cannot listen for Ctrl-C; run continues without it");
                    }
                }
                run.await
            }
        }
    }
}
