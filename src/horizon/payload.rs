//! Wire shapes for the faucet and Horizon endpoints. Only the fields the
//! engine consumes are modelled; everything else is ignored on decode.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Successful faucet response; the faucet returns the funding transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct FundingReceipt {
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BalanceLine {
    pub asset_type: String,
    pub balance: String,
}

/// Subset of Horizon's `/accounts/{id}` resource.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AccountRecord {
    pub id: String,
    pub sequence: String,
    #[serde(default)]
    pub balances: Vec<BalanceLine>,
}

impl AccountRecord {
    /// Native balance as reported by Horizon (string with 7 decimals).
    pub fn native_balance(&self) -> Option<&str> {
        self.balances
            .iter()
            .find(|line| line.asset_type == "native")
            .map(|line| line.balance.as_str())
    }

    /// Native balance parsed as a float, used only for threshold checks.
    pub fn native_amount(&self) -> Option<f64> {
        self.native_balance()
            .and_then(|raw| raw.trim().parse::<f64>().ok())
    }

    pub fn sequence_number(&self) -> Result<i64> {
        self.sequence
            .trim()
            .parse::<i64>()
            .with_context(|| format!("invalid sequence {:?} for account {}", self.sequence, self.id))
    }
}

/// A transaction envelope that has already been built and signed by the
/// environment. The engine only cares about the sequence it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub sequence: i64,
    pub xdr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReceipt {
    pub hash: String,
    #[serde(default)]
    pub ledger: Option<u64>,
}

/// Horizon/friendbot problem document (RFC 7807 flavoured).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemDocument {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub extras: Option<ProblemExtras>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemExtras {
    #[serde(default)]
    pub result_codes: Option<Value>,
}

impl ProblemDocument {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// Short human readable reason, preferring ledger result codes.
    pub fn reason(&self) -> Option<String> {
        if let Some(codes) = self.extras.as_ref().and_then(|e| e.result_codes.as_ref()) {
            return Some(codes.to_string());
        }
        self.detail.clone().or_else(|| self.title.clone())
    }
}
