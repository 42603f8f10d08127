//! Per-unit outcome records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Native balance observed on one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BalanceReading {
    Native { amount: String },
    /// The account exists but holds no native line, or does not exist there.
    Absent,
    Error { message: String },
}

impl BalanceReading {
    pub fn is_positive(&self) -> bool {
        match self {
            BalanceReading::Native { amount } => amount
                .trim()
                .parse::<f64>()
                .map(|value| value > 0.0)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Network name to reading.
pub type Balances = BTreeMap<String, BalanceReading>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Funded { tx_hash: String },
    Confirmed { tx_hash: String, balances: Balances },
    TimedOut { tx_hash: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub idx: usize,
    pub public_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub create_attempts: usize,
    #[serde(flatten)]
    pub state: UnitState,
}

impl UnitRecord {
    pub fn new(idx: usize, public_id: impl Into<String>) -> Self {
        Self {
            idx,
            public_id: public_id.into(),
            secret: None,
            create_attempts: 0,
            state: UnitState::Pending,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// The faucet accepted the request, whatever happened afterwards.
    pub fn funded(&self) -> bool {
        matches!(
            self.state,
            UnitState::Funded { .. } | UnitState::Confirmed { .. } | UnitState::TimedOut { .. }
        )
    }

    pub fn confirmed(&self) -> bool {
        matches!(self.state, UnitState::Confirmed { .. })
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match &self.state {
            UnitState::Funded { tx_hash }
            | UnitState::Confirmed { tx_hash, .. }
            | UnitState::TimedOut { tx_hash } => Some(tx_hash),
            UnitState::Pending | UnitState::Failed { .. } => None,
        }
    }

    pub fn balances(&self) -> Option<&Balances> {
        match &self.state {
            UnitState::Confirmed { balances, .. } => Some(balances),
            _ => None,
        }
    }

    pub fn mark_funded(&mut self, tx_hash: impl Into<String>, attempts: usize) {
        self.create_attempts = attempts;
        self.state = UnitState::Funded {
            tx_hash: tx_hash.into(),
        };
    }

    /// Only a funded unit can be confirmed; otherwise the state is unchanged.
    pub fn mark_confirmed(&mut self, balances: Balances) {
        if let UnitState::Funded { tx_hash } = &mut self.state {
            let tx_hash = std::mem::take(tx_hash);
            self.state = UnitState::Confirmed { tx_hash, balances };
        }
    }

    pub fn mark_timed_out(&mut self) {
        if let UnitState::Funded { tx_hash } = &mut self.state {
            let tx_hash = std::mem::take(tx_hash);
            self.state = UnitState::TimedOut { tx_hash };
        }
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = UnitState::Failed {
            reason: reason.into(),
        };
    }
}
