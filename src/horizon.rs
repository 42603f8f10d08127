//! Ledger network plumbing: faucet and Horizon HTTP clients, the trait seams
//! the engine depends on, wire payloads, request metrics, and identity
//! generation.

pub mod client;
pub mod identity;
pub mod metrics;
pub mod payload;

pub use client::{
    is_not_found, AccountReader, FriendbotClient, FundingEndpoint, HorizonClient, HorizonError,
    SubmitEndpoint,
};
pub use identity::{identity_from_seed, Identity, IdentitySource, RandomKeypairs};
pub use metrics::HttpMetricsSnapshot;
pub use payload::{AccountRecord, BalanceLine, SignedEnvelope, SubmitReceipt};
