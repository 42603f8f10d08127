use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, SeededIdentities},
    mock_horizon::{MockHorizonServer, MockNetwork},
};
use anyhow::Result;
use fundbot::engine::retry::FUND_RETRY;
use fundbot::engine::{
    EnvelopeBuilder, Exhaustion, FunderBootstrap, OrderedSubmitter, PollPolicy, RetryOutcome,
    SequenceMode,
};
use fundbot::horizon::{is_not_found, Identity, IdentitySource, SignedEnvelope};
use fundbot::{
    FriendbotClient, HorizonClient, HorizonError, RetryPolicy, RetryingAction, TransportHandle,
    TransportOptions,
};

fn direct_transport() -> Result<Arc<TransportHandle>> {
    Ok(Arc::new(TransportHandle::new(TransportOptions::direct())?))
}

fn status_of(err: &anyhow::Error) -> Option<u16> {
    match err.downcast_ref::<HorizonError>() {
        Some(HorizonError::Status { status, .. }) | Some(HorizonError::Rejected { status, .. }) => {
            Some(*status)
        }
        _ => None,
    }
}

struct TaggedEnvelopes;

impl EnvelopeBuilder for TaggedEnvelopes {
    fn build(&self, _origin: &Identity, sequence: i64, _index: usize) -> Result<SignedEnvelope> {
        Ok(SignedEnvelope {
            sequence,
            xdr: format!("seq-{sequence}"),
        })
    }
}

#[tokio::test]
async fn funding_returns_hash_and_account_becomes_readable() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let transport = direct_transport()?;
    let friendbot = FriendbotClient::new(format!("{}/friendbot", server.url()), transport.clone());
    let horizon = HorizonClient::new(format!("{}/", server.url()), transport);

    let identity = SeededIdentities.generate(1);
    let hash = friendbot.fund(&identity.public_id).await?;
    assert_eq!(hash.len(), 64);
    assert_eq!(network.friendbot_requests(), 1);

    let account = horizon.load_account(&identity.public_id).await?;
    assert_eq!(account.id, identity.public_id);
    assert_eq!(account.native_amount(), Some(10_000.0));
    assert_eq!(account.sequence_number()?, 4_294_967_296);

    assert_eq!(friendbot.metrics().total_requests, 1);
    assert_eq!(friendbot.metrics().total_errors, 0);
    assert_eq!(horizon.metrics().total_requests, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn statuses_map_to_error_classes() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let transport = direct_transport()?;
    let friendbot = FriendbotClient::new(format!("{}/friendbot", server.url()), transport.clone());
    let horizon = HorizonClient::new(server.url(), transport);

    network.fail_friendbot([429, 500, 400]);
    let identity = SeededIdentities.generate(2);

    let rate_limited = friendbot.fund(&identity.public_id).await.unwrap_err();
    assert!(matches!(
        rate_limited.downcast_ref::<HorizonError>(),
        Some(HorizonError::Status { status: 429, .. })
    ));

    let server_error = friendbot.fund(&identity.public_id).await.unwrap_err();
    assert_eq!(status_of(&server_error), Some(500));

    let rejected = friendbot.fund(&identity.public_id).await.unwrap_err();
    match rejected.downcast_ref::<HorizonError>() {
        Some(HorizonError::Rejected { status, reason, .. }) => {
            assert_eq!(*status, 400);
            assert_eq!(reason, "createAccountAlreadyExist");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let missing = horizon.load_account("GMISSING").await.unwrap_err();
    assert!(is_not_found(&missing));
    assert_eq!(friendbot.metrics().total_errors, 3);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn retrying_action_outlasts_transient_statuses() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let friendbot = FriendbotClient::new(format!("{}/friendbot", server.url()), direct_transport()?);

    network.fail_friendbot([503, 429]);
    let identity = SeededIdentities.generate(3);
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        on_exhaustion: Exhaustion::Propagate,
    };

    let outcome = RetryingAction::new(policy, &FUND_RETRY)
        .for_unit(3)
        .run(|_| friendbot.fund(&identity.public_id))
        .await?;

    match outcome {
        RetryOutcome::Completed { attempts, value } => {
            assert_eq!(attempts, 3);
            assert_eq!(value.len(), 64);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(network.friendbot_requests(), 3);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_funding_is_not_retried() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let friendbot = FriendbotClient::new(format!("{}/friendbot", server.url()), direct_transport()?);

    network.fail_friendbot([400]);
    let identity = SeededIdentities.generate(4);
    let err = RetryingAction::new(RetryPolicy::default(), &FUND_RETRY)
        .run(|_| friendbot.fund(&identity.public_id))
        .await
        .unwrap_err();

    assert_eq!(status_of(&err), Some(400));
    assert_eq!(network.friendbot_requests(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn ordered_submission_uses_contiguous_sequences_and_reports_result_codes() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let horizon = Arc::new(HorizonClient::new(server.url(), direct_transport()?));

    let origin = SeededIdentities.generate(9);
    network.seed_account(&origin.public_id, 100, "500.0000000");
    network.fail_submissions([400]);

    let submitter = OrderedSubmitter::new(horizon.clone(), horizon.clone(), Arc::new(TaggedEnvelopes));
    let report = submitter
        .submit_all(&origin, 4, SequenceMode::Snapshot)
        .await?;

    assert_eq!(report.submitted, 4);
    assert_eq!(report.accepted, 3);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].reason.contains("tx_bad_seq"));
    assert_eq!(network.submissions(), 4);

    let mut envelopes = network.submitted_envelopes();
    envelopes.sort();
    assert_eq!(envelopes, vec!["seq-101", "seq-102", "seq-103", "seq-104"]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn refresh_mode_rereads_sequence_per_chunk() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let horizon = Arc::new(HorizonClient::new(server.url(), direct_transport()?));

    let origin = SeededIdentities.generate(10);
    network.seed_account(&origin.public_id, 200, "500.0000000");

    let submitter = OrderedSubmitter::new(horizon.clone(), horizon.clone(), Arc::new(TaggedEnvelopes));
    let report = submitter
        .submit_all(&origin, 5, SequenceMode::Refresh { chunk: 2 })
        .await?;

    assert_eq!(report.accepted, 5);
    assert!(report.rejected.is_empty());
    assert_eq!(network.account_reads(), 3);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn bootstrapped_origin_submits_then_merges_accounts_back() -> Result<()> {
    init_tracing();
    let network = MockNetwork::new();
    let server = MockHorizonServer::start(network.clone()).await?;
    let transport = direct_transport()?;
    let friendbot = Arc::new(FriendbotClient::new(
        format!("{}/friendbot", server.url()),
        transport.clone(),
    ));
    let horizon = Arc::new(HorizonClient::new(server.url(), transport));
    let dir = tempfile::tempdir()?;

    let origin = SeededIdentities.generate(20);
    FunderBootstrap::new(friendbot, horizon.clone())
        .with_poll_policy(PollPolicy {
            timeout: Duration::from_millis(500),
            interval: Duration::from_millis(10),
        })
        .bootstrap(&origin)
        .await?;
    assert_eq!(network.friendbot_requests(), 1);

    let submitter = OrderedSubmitter::new(horizon.clone(), horizon.clone(), Arc::new(TaggedEnvelopes));
    let report = submitter
        .submit_all(&origin, 3, SequenceMode::Snapshot)
        .await?;
    assert_eq!(report.accepted, 3);

    // the mock does not apply submissions, so the created accounts are seeded by hand
    let created: Vec<Identity> = (21..24).map(|idx| SeededIdentities.generate(idx)).collect();
    network.seed_account(&created[0].public_id, 50, "1.0000000");
    network.seed_account(&created[2].public_id, 70, "1.0000000");
    let merged = submitter.merge_back(&created, &TaggedEnvelopes).await;
    assert_eq!(merged.skipped, 1);
    assert_eq!(merged.accepted, 2);

    let mut envelopes = network.submitted_envelopes();
    envelopes.sort();
    assert_eq!(
        envelopes,
        vec![
            "seq-4294967297",
            "seq-4294967298",
            "seq-4294967299",
            "seq-51",
            "seq-71"
        ]
    );

    let path = dir.path().join("tps_results.json");
    report.write_to(&path).await?;
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert_eq!(value["submitted"], 3);
    assert!(value["tps"].as_f64().is_some());

    server.shutdown().await;
    Ok(())
}
