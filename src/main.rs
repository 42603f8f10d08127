use anyhow::Result;
use fundbot::{init_tracing, LoadConfig, Runner};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let config = LoadConfig::from_env()?;
    let runner = Runner::from_config(config)?;
    let report = runner.run_until_ctrl_c().await?;

    println!(
        "Summary: {}/{} successful, {} failed, {} anomalies, {:.2} units/s over {:.1}s ({:?})",
        report.success,
        report.total_runs,
        report.failures,
        report.anomalies,
        report.throughput,
        report.duration_seconds,
        report.status,
    );
    if let Some(error) = &report.error {
        eprintln!("run error: {error}");
    }

    Ok(ExitCode::from(report.exit_code()))
}
