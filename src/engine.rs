//! Batch execution engine: retrying actions, confirmation polling, ordered
//! sequence allocation, batch scheduling, and per-unit result collection.

pub mod bootstrap;
pub mod poll;
pub mod provision;
pub mod results;
pub mod retry;
pub mod scheduler;
pub mod sequence;
pub mod submit;
pub mod unit;

pub use bootstrap::{FunderBootstrap, DEFAULT_BOOTSTRAP_POLL, DEFAULT_FUNDER_MIN_BALANCE};
pub use poll::{ConfirmationPoller, PollPolicy, Probe};
pub use provision::{ConfirmFaultPolicy, ProbeNetwork, Provisioner, ProvisionerParams};
pub use results::{unexpected_balance, LedgerSummary, ResultLedger};
pub use retry::{
    attempts_spent, classify_error, AttemptsSpent, ErrorClass, Exhaustion, RetryLabels,
    RetryOutcome, RetryPolicy, RetryingAction,
};
pub use scheduler::{Batch, BatchPlan, BatchReport, BatchScheduler, ScheduleReport};
pub use sequence::{SequenceAllocator, SequenceMode, SequenceRange};
pub use submit::{
    split_across_origins, EnvelopeBuilder, OrderedSubmitter, Rejection, SubmissionReport,
};
pub use unit::{BalanceReading, Balances, UnitRecord, UnitState};
