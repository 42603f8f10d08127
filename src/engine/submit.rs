//! Bulk submission of many ordered transactions from one originating
//! identity (or a handful of them).

use crate::engine::retry::{Exhaustion, RetryPolicy, RetryingAction, SEQUENCE_READ_RETRY};
use crate::engine::sequence::{SequenceAllocator, SequenceMode, SequenceRange};
use crate::horizon::client::{AccountReader, HorizonError, SubmitEndpoint};
use crate::horizon::identity::Identity;
use crate::horizon::payload::SignedEnvelope;
use crate::runtime::report::write_json;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Builds and signs the envelope for one ordinal. Supplied by the
/// environment; the engine treats the result as opaque.
pub trait EnvelopeBuilder: Send + Sync {
    fn build(&self, origin: &Identity, sequence: i64, index: usize) -> Result<SignedEnvelope>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub sequence: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionReport {
    pub submitted: usize,
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
    /// Accounts a merge-back pass could not read, so never built or sent.
    pub skipped: usize,
    #[serde(rename = "duration_seconds", serialize_with = "as_seconds")]
    pub elapsed: Duration,
}

fn as_seconds<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

#[derive(Serialize)]
struct SubmissionResults<'a> {
    timestamp: String,
    tps: f64,
    #[serde(flatten)]
    report: &'a SubmissionReport,
}

impl SubmissionReport {
    /// Accepted submissions per second of wall time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.accepted as f64 / secs
        } else {
            0.0
        }
    }

    /// Writes the report with a timestamp and its throughput as JSON.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let results = SubmissionResults {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            tps: self.throughput(),
            report: self,
        };
        write_json(&results, path, "submission report").await
    }

    fn merge(&mut self, other: SubmissionReport) {
        self.submitted += other.submitted;
        self.accepted += other.accepted;
        self.rejected.extend(other.rejected);
        self.skipped += other.skipped;
        self.elapsed = self.elapsed.max(other.elapsed);
    }
}

/// Divides `total` across `origins` funders: each gets `ceil(total / origins)`
/// except the last ones, which take whatever remains.
pub fn split_across_origins(total: usize, origins: usize) -> Vec<usize> {
    if origins == 0 {
        return Vec::new();
    }
    let per_origin = total.div_ceil(origins);
    let mut remaining = total;
    (0..origins)
        .map(|_| {
            let share = per_origin.min(remaining);
            remaining -= share;
            share
        })
        .collect()
}

pub struct OrderedSubmitter {
    reader: Arc<dyn AccountReader>,
    submitter: Arc<dyn SubmitEndpoint>,
    builder: Arc<dyn EnvelopeBuilder>,
    read_policy: RetryPolicy,
    telemetry: Option<Arc<Telemetry>>,
}

impl OrderedSubmitter {
    pub fn new(
        reader: Arc<dyn AccountReader>,
        submitter: Arc<dyn SubmitEndpoint>,
        builder: Arc<dyn EnvelopeBuilder>,
    ) -> Self {
        Self {
            reader,
            submitter,
            builder,
            read_policy: RetryPolicy {
                on_exhaustion: Exhaustion::Propagate,
                ..RetryPolicy::default()
            },
            telemetry: None,
        }
    }

    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = RetryPolicy {
            on_exhaustion: Exhaustion::Propagate,
            ..policy
        };
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Submits `count` envelopes from `origin`, each with its own sequence.
    ///
    /// In snapshot mode the remote sequence is read once and every envelope
    /// is submitted concurrently. Once one ordinal fails the ledger rejects
    /// all higher ones; those rejections are reported as they come back.
    pub async fn submit_all(
        &self,
        origin: &Identity,
        count: usize,
        mode: SequenceMode,
    ) -> Result<SubmissionReport> {
        let chunk = match mode {
            SequenceMode::Snapshot => count.max(1),
            SequenceMode::Refresh { chunk } => {
                if chunk == 0 {
                    bail!("refresh chunk must be greater than 0");
                }
                chunk
            }
        };

        let started = Instant::now();
        let base = self.read_sequence(origin).await?;
        let allocator = SequenceAllocator::new(base);
        tracing::info!(
            origin = %origin.public_id,
            base_sequence = base,
            count,
            ?mode,
            "starting ordered submission"
        );

        let mut report = SubmissionReport::default();
        let mut offset = 0;
        while offset < count {
            if offset > 0 {
                allocator.reset(self.read_sequence(origin).await?);
            }
            let len = chunk.min(count - offset);
            let range = allocator.allocate(len);
            let chunk_report = self.submit_range(origin, offset, range).await;
            report.merge(chunk_report);
            offset += len;
        }
        report.elapsed = started.elapsed();

        tracing::info!(
            origin = %origin.public_id,
            submitted = report.submitted,
            accepted = report.accepted,
            rejected = report.rejected.len(),
            tps = report.throughput(),
            "ordered submission finished"
        );
        Ok(report)
    }

    /// Splits `total` across several origins and runs their submissions
    /// concurrently, each with its own allocator.
    pub async fn submit_split(
        &self,
        origins: &[Identity],
        total: usize,
        mode: SequenceMode,
    ) -> Result<SubmissionReport> {
        let started = Instant::now();
        let shares = split_across_origins(total, origins.len());
        let runs = origins
            .iter()
            .zip(shares)
            .filter(|(_, share)| *share > 0)
            .map(|(origin, share)| self.submit_all(origin, share, mode));

        let mut report = SubmissionReport::default();
        for result in join_all(runs).await {
            report.merge(result?);
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Sends one envelope per account, each signed by that account at its
    /// current sequence plus one. `builder` decides what the envelope does
    /// (typically merging the account back into a funder). Accounts that
    /// cannot be read are counted as skipped; reads are not retried.
    pub async fn merge_back(
        &self,
        accounts: &[Identity],
        builder: &dyn EnvelopeBuilder,
    ) -> SubmissionReport {
        let started = Instant::now();
        let reads = accounts.iter().map(|account| async move {
            let loaded = self.reader.load_account(&account.public_id).await;
            (account, loaded.and_then(|record| record.sequence_number()))
        });

        let mut report = SubmissionReport::default();
        let mut pending = Vec::with_capacity(accounts.len());
        for (index, (account, sequence)) in join_all(reads).await.into_iter().enumerate() {
            let sequence = match sequence {
                Ok(current) => current + 1,
                Err(err) => {
                    tracing::debug!(account = %account.public_id, error = %err, "skipping unreadable account");
                    report.skipped += 1;
                    continue;
                }
            };
            match builder.build(account, sequence, index) {
                Ok(envelope) => pending.push((index, envelope)),
                Err(err) => {
                    tracing::warn!(index, sequence, error = %err, "failed to build envelope");
                    report.rejected.push(Rejection {
                        index,
                        sequence,
                        reason: format!("build failed: {err}"),
                    });
                }
            }
        }

        self.submit_pending(&pending, &mut report).await;
        report.elapsed = started.elapsed();
        tracing::info!(
            accounts = accounts.len(),
            accepted = report.accepted,
            rejected = report.rejected.len(),
            skipped = report.skipped,
            "merge-back finished"
        );
        report
    }

    async fn read_sequence(&self, origin: &Identity) -> Result<i64> {
        let action = RetryingAction::new(self.read_policy, &SEQUENCE_READ_RETRY);
        let action = match &self.telemetry {
            Some(telemetry) => action.with_telemetry(telemetry),
            None => action,
        };
        let reader = &self.reader;
        let public_id = origin.public_id.as_str();
        let outcome = action
            .run(move |_| async move {
                let account = reader.load_account(public_id).await?;
                account.sequence_number()
            })
            .await?;
        match outcome.into_value() {
            Some(sequence) => Ok(sequence),
            None => bail!("sequence read for {} was skipped", origin.public_id),
        }
    }

    async fn submit_range(
        &self,
        origin: &Identity,
        offset: usize,
        range: SequenceRange,
    ) -> SubmissionReport {
        let mut report = SubmissionReport::default();
        let mut pending = Vec::with_capacity(range.len());

        for (position, sequence) in range.enumerate() {
            let index = offset + position;
            match self.builder.build(origin, sequence, index) {
                Ok(envelope) => pending.push((index, envelope)),
                Err(err) => {
                    // the ordinal is burned; later ones will be rejected as well
                    tracing::warn!(index, sequence, error = %err, "failed to build envelope");
                    report.rejected.push(Rejection {
                        index,
                        sequence,
                        reason: format!("build failed: {err}"),
                    });
                }
            }
        }

        self.submit_pending(&pending, &mut report).await;
        report
    }

    async fn submit_pending(
        &self,
        pending: &[(usize, SignedEnvelope)],
        report: &mut SubmissionReport,
    ) {
        let submissions = pending.iter().map(|(index, envelope)| async move {
            let result = self.submitter.submit(envelope).await;
            (*index, envelope.sequence, result)
        });

        for (index, sequence, result) in join_all(submissions).await {
            report.submitted += 1;
            match result {
                Ok(receipt) => {
                    report.accepted += 1;
                    self.record(true);
                    tracing::debug!(index, sequence, hash = %receipt.hash, "submission accepted");
                }
                Err(err) => {
                    self.record(false);
                    let reason = rejection_reason(&err);
                    tracing::warn!(index, sequence, reason = %reason, "submission rejected");
                    report.rejected.push(Rejection {
                        index,
                        sequence,
                        reason,
                    });
                }
            }
        }

        report.rejected.sort_by_key(|rejection| rejection.index);
    }

    fn record(&self, accepted: bool) {
        if let Some(telemetry) = &self.telemetry {
            if accepted {
                telemetry.record_submission_accepted();
            } else {
                telemetry.record_submission_rejected();
            }
        }
    }
}

fn rejection_reason(err: &anyhow::Error) -> String {
    match err.downcast_ref::<HorizonError>() {
        Some(HorizonError::Rejected { reason, .. }) => reason.clone(),
        _ => format!("{err:#}"),
    }
}
