pub mod engine;
pub mod horizon;
pub mod runtime;
pub mod transport;

pub use engine::{
    BatchPlan, BatchScheduler, ConfirmFaultPolicy, ConfirmationPoller, Exhaustion,
    FunderBootstrap, OrderedSubmitter, Provisioner, ResultLedger, RetryPolicy, RetryingAction,
    SequenceAllocator, SubmissionReport, UnitRecord, UnitState,
};
pub use horizon::{FriendbotClient, HorizonClient, HorizonError, Identity, IdentitySource};
pub use runtime::config::{LoadConfig, LoadConfigBuilder, LoadConfigParams, ProbeHorizon};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::report::{RunReport, RunStatus};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use transport::{await_ready, GateError, TransportHandle, TransportOptions};
