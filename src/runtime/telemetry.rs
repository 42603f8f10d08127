use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Run-wide counters shared by every unit task.
#[derive(Default, Debug)]
pub struct Telemetry {
    funding_requests: AtomicU64,
    retries: AtomicU64,
    funded: AtomicU64,
    confirmed: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    transport_rotations: AtomicU64,
    submissions_accepted: AtomicU64,
    submissions_rejected: AtomicU64,
}

impl Telemetry {
    pub fn record_funding_request(&self) {
        self.funding_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_funded(&self) {
        self.funded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.transport_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_accepted(&self) {
        self.submissions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            funding_requests: self.funding_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            funded: self.funded.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            transport_rotations: self.transport_rotations.load(Ordering::Relaxed),
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub funding_requests: u64,
    pub retries: u64,
    pub funded: u64,
    pub confirmed: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub transport_rotations: u64,
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
}

impl TelemetrySnapshot {
    /// Units that reached a final state.
    pub fn settled(&self) -> u64 {
        self.confirmed + self.timed_out + self.failed
    }
}

/// Spawns a background task that periodically logs funding throughput and
/// unit outcome counters until `shutdown` fires.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "fundbot::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let settled_delta = current_snapshot
                        .settled()
                        .saturating_sub(last_snapshot.settled());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        settled_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "fundbot::metrics",
                        throughput = format!("{throughput:.2}"),
                        requests = current_snapshot.funding_requests,
                        funded = current_snapshot.funded,
                        confirmed = current_snapshot.confirmed,
                        timed_out = current_snapshot.timed_out,
                        failed = current_snapshot.failed,
                        retries = current_snapshot.retries,
                        rotations = current_snapshot.transport_rotations,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
