use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{fast_config, init_tracing, SeededIdentities},
    mock_horizon::{MockHorizonServer, MockNetwork},
};
use anyhow::Result;
use fundbot::horizon::IdentitySource;
use fundbot::{ProbeHorizon, RunStatus, Runner, UnitState};
use tokio::net::TcpListener;

#[tokio::test]
async fn all_units_confirm_and_report_is_written() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;
    let results = dir.path().join("results.json");

    let config = fast_config(server.url()).results_path(&results).build()?;
    let runner = Runner::from_config(config)?.with_identity_source(Arc::new(SeededIdentities));
    let report = runner.run().await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.success, 6);
    assert_eq!(report.failures, 0);
    assert_eq!(report.anomalies, 0);
    assert!(report.anomalous_units.is_empty());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.telemetry.confirmed, 6);
    assert_eq!(network.friendbot_requests(), 6);
    assert_eq!(network.account_count(), 6);

    let indices: Vec<usize> = report.records.iter().map(|record| record.idx).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    assert!(report
        .records
        .iter()
        .all(|record| matches!(record.state, UnitState::Confirmed { .. })));

    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&results)?)?;
    assert_eq!(value["status"], "completed");
    assert_eq!(value["success"], 6);
    assert_eq!(value["records"][0]["balances"]["testnet"]["kind"], "native");
    assert!(value["records"][0].get("secret").is_none());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_units_fail_without_stopping_siblings() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;

    network.fail_friendbot([400]);
    let config = fast_config(server.url())
        .results_path(dir.path().join("results.json"))
        .build()?;
    let report = Runner::from_config(config)?.run().await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.success, 5);
    assert_eq!(report.failures, 1);
    assert_eq!(report.exit_code(), 1);
    let failed = report
        .records
        .iter()
        .filter(|record| matches!(record.state, UnitState::Failed { .. }))
        .count();
    assert_eq!(failed, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn one_flaky_unit_recovers_alongside_its_batch() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;

    let flaky = SeededIdentities.generate(3).public_id;
    network.fail_friendbot_for(&flaky, [503, 503]);
    let config = fast_config(server.url())
        .total_runs(5)
        .batch_size(5)
        .results_path(dir.path().join("results.json"))
        .build()?;
    let report = Runner::from_config(config)?
        .with_identity_source(Arc::new(SeededIdentities))
        .run()
        .await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.success, 5);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(network.friendbot_requests(), 7);
    for record in &report.records {
        assert!(matches!(record.state, UnitState::Confirmed { .. }));
        let expected = if record.idx == 3 { 3 } else { 1 };
        assert_eq!(record.create_attempts, expected, "unit {}", record.idx);
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn one_unobserved_unit_times_out_alone() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;

    network.hide_account(&SeededIdentities.generate(2).public_id);
    let config = fast_config(server.url())
        .total_runs(5)
        .batch_size(5)
        .confirm_timeout(Duration::from_millis(100))
        .results_path(dir.path().join("results.json"))
        .build()?;
    let report = Runner::from_config(config)?
        .with_identity_source(Arc::new(SeededIdentities))
        .run()
        .await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.success, 4);
    assert_eq!(report.failures, 1);
    assert_eq!(report.telemetry.timed_out, 1);
    assert_eq!(report.records.len(), 5);
    for record in &report.records {
        if record.idx == 2 {
            assert!(matches!(record.state, UnitState::TimedOut { .. }));
            assert!(record.funded());
        } else {
            assert!(record.confirmed(), "unit {} should confirm", record.idx);
        }
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unobserved_accounts_time_out() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    network.hide_accounts(true);
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;

    let config = fast_config(server.url())
        .total_runs(2)
        .confirm_timeout(Duration::from_millis(60))
        .results_path(dir.path().join("results.json"))
        .build()?;
    let report = Runner::from_config(config)?.run().await?;

    assert_eq!(report.success, 0);
    assert_eq!(report.telemetry.timed_out, 2);
    assert!(report
        .records
        .iter()
        .all(|record| matches!(record.state, UnitState::TimedOut { .. })));
    assert_eq!(report.exit_code(), 1);
    assert!(network.account_reads() >= 2);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn balance_on_probe_network_is_an_anomaly() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    // the probe sees the same ledger, so every funded account leaks onto it
    let probe = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;

    let config = fast_config(server.url())
        .total_runs(3)
        .probe_horizons(vec![ProbeHorizon {
            name: "mainnet".into(),
            url: probe.url().to_owned(),
        }])
        .results_path(dir.path().join("results.json"))
        .build()?;
    let report = Runner::from_config(config)?.run().await?;

    assert_eq!(report.success, 3);
    assert_eq!(report.anomalies, 3);
    assert_eq!(report.anomalous_units, vec![1, 2, 3]);
    assert_eq!(report.exit_code(), 1);
    assert!(report.http.contains_key("mainnet"));

    probe.shutdown().await;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_proxy_fails_preflight_without_funding() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;
    let results = dir.path().join("results.json");

    let closed = TcpListener::bind("127.0.0.1:0").await?;
    let proxy = format!("socks5h://{}", closed.local_addr()?);
    drop(closed);

    let config = fast_config(server.url())
        .proxy_url(proxy)
        .proxy_ready_timeout(Duration::from_millis(200))
        .results_path(&results)
        .build()?;
    let report = Runner::from_config(config)?.run().await?;

    assert_eq!(report.status, RunStatus::PreflightFailed);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.failures, 6);
    assert!(report.error.is_some());
    assert_eq!(network.friendbot_requests(), 0);

    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&results)?)?;
    assert_eq!(value["status"], "preflight_failed");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelled_run_reports_interrupted() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let dir = tempfile::tempdir()?;

    let config = fast_config(server.url())
        .results_path(dir.path().join("results.json"))
        .build()?;
    let runner = Runner::from_config(config)?;
    runner.cancellation_token().cancel();
    let report = runner.run().await?;

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(network.friendbot_requests(), 0);
    assert!(report.records.is_empty());

    server.shutdown().await;
    Ok(())
}
