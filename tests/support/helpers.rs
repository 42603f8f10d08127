use std::time::Duration;

use fundbot::horizon::{identity_from_seed, Identity, IdentitySource};
use fundbot::{LoadConfig, LoadConfigBuilder};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Deterministic identities: unit `idx` always gets the same keypair.
#[derive(Debug, Default)]
pub struct SeededIdentities;

impl IdentitySource for SeededIdentities {
    fn generate(&self, idx: usize) -> Identity {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&(idx as u64).to_le_bytes());
        seed[31] = 0x5a;
        identity_from_seed(&seed)
    }
}

/// Fast, unproxied config pointed at a mock server.
pub fn fast_config(base_url: &str) -> LoadConfigBuilder {
    LoadConfig::builder()
        .direct()
        .friendbot_url(format!("{base_url}/friendbot"))
        .horizon_url(base_url)
        .total_runs(6)
        .batch_size(3)
        .per_request_delay(Duration::from_millis(1))
        .max_retries(3)
        .retry_backoff(Duration::from_millis(5))
        .confirm_timeout(Duration::from_millis(500))
        .confirm_poll_interval(Duration::from_millis(10))
        .request_timeout(Duration::from_secs(5))
        .metrics_interval(Duration::from_millis(50))
}
