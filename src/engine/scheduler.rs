//! Sequential batches of concurrently running, staggered tasks.
//!
//! Tasks within a batch are plain futures joined on the current task; the
//! next batch starts only after every task of the previous one settled.

use anyhow::{bail, Result};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: usize,
    batch_size: usize,
    stagger: Duration,
}

impl BatchPlan {
    pub fn new(total: usize, batch_size: usize, stagger: Duration) -> Result<Self> {
        if batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }
        Ok(Self {
            total,
            batch_size,
            stagger,
        })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stagger(&self) -> Duration {
        self.stagger
    }

    /// Consecutive batches covering `1..=total`.
    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        (1..=self.total)
            .step_by(self.batch_size)
            .map(move |start| Batch {
                start,
                len: self.batch_size.min(self.total + 1 - start),
            })
    }
}

/// Contiguous unit indices `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub start: usize,
    pub len: usize,
}

impl Batch {
    pub fn indices(&self) -> Range<usize> {
        self.start..self.start + self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub start: usize,
    pub len: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub batches: Vec<BatchReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Failed,
    Skipped,
}

pub struct BatchScheduler {
    plan: BatchPlan,
    shutdown: CancellationToken,
}

impl BatchScheduler {
    pub fn new(plan: BatchPlan, shutdown: CancellationToken) -> Self {
        Self { plan, shutdown }
    }

    pub fn plan(&self) -> &BatchPlan {
        &self.plan
    }

    /// Runs `task(idx)` for every index of the plan. `Ok(true)` is a success;
    /// `Ok(false)`, an error, or a panic is a failure of that task alone.
    ///
    /// Once the shutdown token fires no further batch starts and staggered
    /// tasks that have not begun are skipped. Started tasks run to completion.
    pub async fn run<F, Fut>(&self, task: F) -> ScheduleReport
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut report = ScheduleReport::default();
        let task = &task;

        for batch in self.plan.batches() {
            if self.shutdown.is_cancelled() {
                report.cancelled = true;
                report.skipped += batch.len;
                report.batches.push(BatchReport {
                    start: batch.start,
                    len: batch.len,
                    succeeded: 0,
                    failed: 0,
                    skipped: batch.len,
                });
                continue;
            }

            tracing::debug!(start = batch.start, len = batch.len, "starting batch");
            let outcomes = join_all(
                batch
                    .indices()
                    .enumerate()
                    .map(|(position, idx)| self.run_one(task, position, idx)),
            )
            .await;

            let mut batch_report = BatchReport {
                start: batch.start,
                len: batch.len,
                succeeded: 0,
                failed: 0,
                skipped: 0,
            };
            for outcome in outcomes {
                match outcome {
                    TaskOutcome::Succeeded => batch_report.succeeded += 1,
                    TaskOutcome::Failed => batch_report.failed += 1,
                    TaskOutcome::Skipped => batch_report.skipped += 1,
                }
            }
            tracing::info!(
                start = batch.start,
                len = batch.len,
                succeeded = batch_report.succeeded,
                failed = batch_report.failed,
                skipped = batch_report.skipped,
                "batch finished"
            );

            report.succeeded += batch_report.succeeded;
            report.failed += batch_report.failed;
            report.skipped += batch_report.skipped;
            report.batches.push(batch_report);
        }

        if self.shutdown.is_cancelled() {
            report.cancelled = true;
        }
        report
    }

    async fn run_one<F, Fut>(&self, task: &F, position: usize, idx: usize) -> TaskOutcome
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let delay = self
            .plan
            .stagger
            .saturating_mul(u32::try_from(position).unwrap_or(u32::MAX));
        if !delay.is_zero() {
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = sleep(delay) => {}
            }
        }
        if self.shutdown.is_cancelled() {
            tracing::debug!(unit = idx, "run cancelled before unit started");
            return TaskOutcome::Skipped;
        }

        match AssertUnwindSafe(task(idx)).catch_unwind().await {
            Ok(Ok(true)) => TaskOutcome::Succeeded,
            Ok(Ok(false)) => TaskOutcome::Failed,
            Ok(Err(err)) => {
                tracing::error!(unit = idx, error = %err, "unit task failed");
                TaskOutcome::Failed
            }
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(unit = idx, panic = %panic_msg, "unit task panicked");
                TaskOutcome::Failed
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
