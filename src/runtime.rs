//! Runtime glue that wires configuration, telemetry, the fatal-error switch,
//! run reports, and runner orchestration.

pub mod config;
pub mod fatal;
pub mod report;
pub mod runner;
pub mod telemetry;
