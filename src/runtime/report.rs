//! Machine-readable summary written at the end of every run.

use crate::engine::results::LedgerSummary;
use crate::engine::unit::UnitRecord;
use crate::horizon::metrics::HttpMetricsSnapshot;
use crate::runtime::telemetry::TelemetrySnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const EXIT_OK: u8 = 0;
pub const EXIT_UNIT_FAILURES: u8 = 1;
pub const EXIT_PREFLIGHT: u8 = 2;
pub const EXIT_ABORTED: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The transport gate failed; no funding request was sent.
    PreflightFailed,
    /// A unit triggered the abort-run policy.
    Aborted,
    /// Ctrl-C.
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub status: RunStatus,
    pub duration_seconds: f64,
    pub total_runs: usize,
    pub success: usize,
    pub failures: usize,
    pub anomalies: usize,
    /// `idx` of each unit holding a balance on a probe network.
    pub anomalous_units: Vec<usize>,
    /// Confirmed units per second of wall time.
    pub throughput: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub telemetry: TelemetrySnapshot,
    pub http: BTreeMap<String, HttpMetricsSnapshot>,
    pub records: Vec<UnitRecord>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        status: RunStatus,
        elapsed: Duration,
        summary: LedgerSummary,
    ) -> Self {
        let duration_seconds = elapsed.as_secs_f64();
        let throughput = if duration_seconds > 0.0 {
            summary.success as f64 / duration_seconds
        } else {
            0.0
        };
        Self {
            timestamp: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            status,
            duration_seconds,
            total_runs: summary.total,
            success: summary.success,
            failures: summary.failures,
            anomalies: summary.anomalies,
            anomalous_units: summary.anomalous_units,
            throughput,
            error: None,
            telemetry: TelemetrySnapshot::default(),
            http: BTreeMap::new(),
            records: Vec::new(),
        }
    }

    /// Report for a run that never got past the transport gate.
    pub fn preflight_failed(
        started_at: DateTime<Utc>,
        elapsed: Duration,
        total: usize,
        error: String,
    ) -> Self {
        let summary = LedgerSummary {
            total,
            success: 0,
            failures: total,
            anomalies: 0,
            anomalous_units: Vec::new(),
        };
        Self::new(started_at, RunStatus::PreflightFailed, elapsed, summary).with_error(Some(error))
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySnapshot) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_http_metrics(
        mut self,
        name: impl Into<String>,
        metrics: HttpMetricsSnapshot,
    ) -> Self {
        self.http.insert(name.into(), metrics);
        self
    }

    pub fn with_records(mut self, records: Vec<UnitRecord>) -> Self {
        self.records = records;
        self
    }

    /// 0 only for a completed run where every unit succeeded without anomalies.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::PreflightFailed => EXIT_PREFLIGHT,
            RunStatus::Aborted => EXIT_ABORTED,
            RunStatus::Interrupted => EXIT_INTERRUPTED,
            RunStatus::Completed => {
                if self.success == self.total_runs && self.anomalies == 0 {
                    EXIT_OK
                } else {
                    EXIT_UNIT_FAILURES
                }
            }
        }
    }

    /// Writes the report as pretty-printed JSON, replacing any previous file.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        write_json(self, path, "run report").await
    }
}

/// Writes `value` as pretty-printed JSON to `path`, creating parent
/// directories first.
pub async fn write_json<T: Serialize>(value: &T, path: &Path, what: &str) -> Result<()> {
    let body =
        serde_json::to_vec_pretty(value).with_context(|| format!("failed to encode {what}"))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("failed to write {what} to {}", path.display()))?;
    tracing::info!(path = %path.display(), "{what} written");
    Ok(())
}
