//! Collects one outcome record per unit and summarizes them at the end of
//! the run.

use crate::engine::unit::UnitRecord;
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub success: usize,
    pub failures: usize,
    pub anomalies: usize,
    /// `idx` of every anomalous unit, ascending.
    pub anomalous_units: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct ResultLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<UnitRecord>,
    seen: HashSet<usize>,
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finished record. Each `idx` may be recorded only once.
    pub fn append(&self, record: UnitRecord) -> Result<()> {
        let mut state = self.inner.lock().expect("result ledger lock poisoned");
        if !state.seen.insert(record.idx) {
            bail!("unit {} already recorded", record.idx);
        }
        state.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("result ledger lock poisoned")
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records ordered by `idx`.
    pub fn records(&self) -> Vec<UnitRecord> {
        let state = self.inner.lock().expect("result ledger lock poisoned");
        let mut records = state.records.clone();
        records.sort_by_key(|record| record.idx);
        records
    }

    /// `success` counts confirmed units; everything else out of `total`,
    /// including units that never produced a record, is a failure.
    pub fn summarize<F>(&self, total: usize, is_anomaly: F) -> LedgerSummary
    where
        F: Fn(&UnitRecord) -> bool,
    {
        let state = self.inner.lock().expect("result ledger lock poisoned");
        let success = state
            .records
            .iter()
            .filter(|record| record.confirmed())
            .count()
            .min(total);
        let mut anomalous_units: Vec<usize> = state
            .records
            .iter()
            .filter(|&record| is_anomaly(record))
            .map(|record| record.idx)
            .collect();
        anomalous_units.sort_unstable();
        LedgerSummary {
            total,
            success,
            failures: total - success,
            anomalies: anomalous_units.len(),
            anomalous_units,
        }
    }
}

/// Flags records that hold a positive native balance on any network other
/// than `expected_network`.
pub fn unexpected_balance(expected_network: &str) -> impl Fn(&UnitRecord) -> bool + '_ {
    move |record| {
        record.balances().is_some_and(|balances| {
            balances.iter().any(|(network, reading)| {
                network != expected_network && reading.is_positive()
            })
        })
    }
}
