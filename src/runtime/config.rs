use crate::engine::poll::PollPolicy;
use crate::engine::provision::ConfirmFaultPolicy;
use crate::engine::retry::{Exhaustion, RetryPolicy};
use crate::engine::scheduler::BatchPlan;
use crate::runtime::telemetry;
use crate::transport::options::{TransportOptions, DEFAULT_PROXY_URL};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_FRIENDBOT_URL: &str = "https://friendbot.stellar.org/";
pub const DEFAULT_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";
pub const DEFAULT_NETWORK_NAME: &str = "testnet";
pub const DEFAULT_RESULTS_PATH: &str = "friendbot_results.json";

const DEFAULT_TOTAL_RUNS: usize = 1_000;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_PER_REQUEST_DELAY_MS: u64 = 20;
const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONFIRM_POLL_MS: u64 = 1_500;
const DEFAULT_PROXY_READY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Extra Horizon instance consulted after confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHorizon {
    pub name: String,
    pub url: String,
}

/// Runtime configuration for a provisioning run.
///
/// Instances are built through [`LoadConfig::builder`], [`LoadConfig::new`]
/// or [`LoadConfig::from_env`], all of which validate before returning.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadConfig {
    total_runs: usize,
    batch_size: usize,
    per_request_delay: Duration,
    max_retries: usize,
    retry_backoff: Duration,
    retry_exhaustion: Exhaustion,
    confirm_timeout: Duration,
    confirm_poll_interval: Duration,
    confirm_fault: ConfirmFaultPolicy,
    confirm_min_balance: f64,
    friendbot_url: String,
    horizon_url: String,
    network_name: String,
    probe_horizons: Vec<ProbeHorizon>,
    proxy_url: Option<String>,
    proxy_ready_timeout: Duration,
    request_timeout: Duration,
    results_path: PathBuf,
    metrics_interval: Duration,
    record_secrets: bool,
}

pub struct LoadConfigParams {
    pub total_runs: usize,
    pub batch_size: usize,
    pub per_request_delay: Duration,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    pub retry_exhaustion: Exhaustion,
    pub confirm_timeout: Duration,
    pub confirm_poll_interval: Duration,
    pub confirm_fault: ConfirmFaultPolicy,
    pub confirm_min_balance: f64,
    pub friendbot_url: String,
    pub horizon_url: String,
    pub network_name: String,
    pub probe_horizons: Vec<ProbeHorizon>,
    pub proxy_url: Option<String>,
    pub proxy_ready_timeout: Duration,
    pub request_timeout: Duration,
    pub results_path: PathBuf,
    pub metrics_interval: Duration,
    pub record_secrets: bool,
}

impl LoadConfig {
    pub fn builder() -> LoadConfigBuilder {
        LoadConfigBuilder::default()
    }

    pub fn new(params: LoadConfigParams) -> Result<Self> {
        let LoadConfigParams {
            total_runs,
            batch_size,
            per_request_delay,
            max_retries,
            retry_backoff,
            retry_exhaustion,
            confirm_timeout,
            confirm_poll_interval,
            confirm_fault,
            confirm_min_balance,
            friendbot_url,
            horizon_url,
            network_name,
            probe_horizons,
            proxy_url,
            proxy_ready_timeout,
            request_timeout,
            results_path,
            metrics_interval,
            record_secrets,
        } = params;

        let config = Self {
            total_runs,
            batch_size,
            per_request_delay,
            max_retries,
            retry_backoff,
            retry_exhaustion,
            confirm_timeout,
            confirm_poll_interval,
            confirm_fault,
            confirm_min_balance,
            friendbot_url: trimmed_string(friendbot_url),
            horizon_url: trimmed_string(horizon_url),
            network_name: trimmed_string(network_name),
            probe_horizons,
            proxy_url: proxy_url.map(trimmed_string),
            proxy_ready_timeout,
            request_timeout,
            results_path,
            metrics_interval,
            record_secrets,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads the process environment. Unset variables take their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LoadConfig::from_env`] with a caller supplied variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut builder = Self::builder();

        if let Some(value) = env.parse::<usize>("TOTAL_RUNS")? {
            builder = builder.total_runs(value);
        }
        if let Some(value) = env.parse::<usize>("BATCH_SIZE")? {
            builder = builder.batch_size(value);
        }
        if let Some(value) = env.millis("PER_REQ_DELAY_MS")? {
            builder = builder.per_request_delay(value);
        }
        if let Some(value) = env.parse::<usize>("MAX_RETRIES")? {
            builder = builder.max_retries(value);
        }
        if let Some(value) = env.millis("RETRY_BACKOFF_MS")? {
            builder = builder.retry_backoff(value);
        }
        if let Some(value) = env.string("RETRY_EXHAUSTION") {
            builder = builder.retry_exhaustion(parse_exhaustion(&value)?);
        }
        if let Some(value) = env.millis("CONFIRM_TIMEOUT_MS")? {
            builder = builder.confirm_timeout(value);
        }
        if let Some(value) = env.millis("CONFIRM_POLL_MS")? {
            builder = builder.confirm_poll_interval(value);
        }
        if let Some(value) = env.string("CONFIRM_FAULT") {
            builder = builder.confirm_fault(parse_confirm_fault(&value)?);
        }
        if let Some(value) = env.parse::<f64>("CONFIRM_MIN_BALANCE")? {
            builder = builder.confirm_min_balance(value);
        }
        if let Some(value) = env.string("FRIENDBOT_URL") {
            builder = builder.friendbot_url(value);
        }
        if let Some(value) = env.string("HORIZON_URL") {
            builder = builder.horizon_url(value);
        }
        if let Some(value) = env.string("NETWORK_NAME") {
            builder = builder.network_name(value);
        }
        if let Some(value) = env.string("PROBE_HORIZONS") {
            builder = builder.probe_horizons(parse_probe_horizons(&value)?);
        }
        if let Some(value) = env.string("PROXY_URL") {
            builder = if value.eq_ignore_ascii_case("none") {
                builder.direct()
            } else {
                builder.proxy_url(value)
            };
        }
        if let Some(value) = env.millis("PROXY_READY_TIMEOUT_MS")? {
            builder = builder.proxy_ready_timeout(value);
        }
        if let Some(value) = env.millis("REQUEST_TIMEOUT_MS")? {
            builder = builder.request_timeout(value);
        }
        if let Some(value) = env.string("RESULTS_PATH") {
            builder = builder.results_path(value);
        }
        if let Some(value) = env.millis("METRICS_INTERVAL_MS")? {
            builder = builder.metrics_interval(value);
        }
        if let Some(value) = env.string("RECORD_SECRETS") {
            builder = builder.record_secrets(parse_flag("RECORD_SECRETS", &value)?);
        }

        builder.build()
    }

    /// Number of units to provision.
    pub fn total_runs(&self) -> usize {
        self.total_runs
    }

    /// Units started concurrently per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Start offset between consecutive units of a batch.
    pub fn per_request_delay(&self) -> Duration {
        self.per_request_delay
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    pub fn retry_exhaustion(&self) -> Exhaustion {
        self.retry_exhaustion
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        self.confirm_poll_interval
    }

    pub fn confirm_fault(&self) -> ConfirmFaultPolicy {
        self.confirm_fault
    }

    /// Native balance a unit must reach to count as confirmed (always also > 0).
    pub fn confirm_min_balance(&self) -> f64 {
        self.confirm_min_balance
    }

    pub fn friendbot_url(&self) -> &str {
        &self.friendbot_url
    }

    pub fn horizon_url(&self) -> &str {
        &self.horizon_url
    }

    /// Name under which the primary Horizon's balance is recorded.
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn probe_horizons(&self) -> &[ProbeHorizon] {
        &self.probe_horizons
    }

    /// `None` when requests go out directly.
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn proxy_ready_timeout(&self) -> Duration {
        self.proxy_ready_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn record_secrets(&self) -> bool {
        self.record_secrets
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff_base: self.retry_backoff,
            on_exhaustion: self.retry_exhaustion,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            timeout: self.confirm_timeout,
            interval: self.confirm_poll_interval,
        }
    }

    pub fn batch_plan(&self) -> Result<BatchPlan> {
        BatchPlan::new(self.total_runs, self.batch_size, self.per_request_delay)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            proxy_url: self.proxy_url.clone(),
            request_timeout: self.request_timeout,
            ..TransportOptions::default()
        }
    }

    /// `host:port` of the proxy the transport gate probes.
    pub fn proxy_gate_target(&self) -> Result<Option<String>> {
        let Some(proxy) = &self.proxy_url else {
            return Ok(None);
        };
        let url = reqwest::Url::parse(proxy).with_context(|| format!("invalid proxy_url {proxy}"))?;
        let host = url
            .host_str()
            .with_context(|| format!("proxy_url {proxy} has no host"))?;
        let port = url
            .port_or_known_default()
            .with_context(|| format!("proxy_url {proxy} has no port"))?;
        Ok(Some(format!("{host}:{port}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.max_retries == 0 {
            bail!("max_retries must be greater than 0");
        }

        if self.confirm_poll_interval.is_zero() {
            bail!("confirm_poll_interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if !self.confirm_min_balance.is_finite() || self.confirm_min_balance < 0.0 {
            bail!("confirm_min_balance must be a non-negative number");
        }

        validate_url(&self.friendbot_url, "friendbot_url")?;
        validate_url(&self.horizon_url, "horizon_url")?;
        ensure_not_empty(&self.network_name, "network_name")?;

        for probe in &self.probe_horizons {
            ensure_not_empty(&probe.name, "probe_horizons name")?;
            validate_url(&probe.url, "probe_horizons url")?;
            if probe.name == self.network_name {
                bail!(
                    "probe_horizons name {} duplicates network_name",
                    probe.name
                );
            }
        }

        if self.results_path.as_os_str().is_empty() {
            bail!("results_path cannot be empty");
        }

        self.transport_options().validate()?;
        self.proxy_gate_target()?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoadConfigBuilder {
    total_runs: Option<usize>,
    batch_size: Option<usize>,
    per_request_delay: Option<Duration>,
    max_retries: Option<usize>,
    retry_backoff: Option<Duration>,
    retry_exhaustion: Option<Exhaustion>,
    confirm_timeout: Option<Duration>,
    confirm_poll_interval: Option<Duration>,
    confirm_fault: Option<ConfirmFaultPolicy>,
    confirm_min_balance: Option<f64>,
    friendbot_url: Option<String>,
    horizon_url: Option<String>,
    network_name: Option<String>,
    probe_horizons: Option<Vec<ProbeHorizon>>,
    proxy_url: Option<Option<String>>,
    proxy_ready_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    results_path: Option<PathBuf>,
    metrics_interval: Option<Duration>,
    record_secrets: Option<bool>,
}

impl LoadConfigBuilder {
    pub fn total_runs(mut self, total: usize) -> Self {
        self.total_runs = Some(total);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn per_request_delay(mut self, delay: Duration) -> Self {
        self.per_request_delay = Some(delay);
        self
    }

    pub fn max_retries(mut self, attempts: usize) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn retry_exhaustion(mut self, exhaustion: Exhaustion) -> Self {
        self.retry_exhaustion = Some(exhaustion);
        self
    }

    pub fn confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = Some(timeout);
        self
    }

    pub fn confirm_poll_interval(mut self, interval: Duration) -> Self {
        self.confirm_poll_interval = Some(interval);
        self
    }

    pub fn confirm_fault(mut self, policy: ConfirmFaultPolicy) -> Self {
        self.confirm_fault = Some(policy);
        self
    }

    pub fn confirm_min_balance(mut self, balance: f64) -> Self {
        self.confirm_min_balance = Some(balance);
        self
    }

    pub fn friendbot_url(mut self, url: impl Into<String>) -> Self {
        self.friendbot_url = Some(url.into());
        self
    }

    pub fn horizon_url(mut self, url: impl Into<String>) -> Self {
        self.horizon_url = Some(url.into());
        self
    }

    pub fn network_name(mut self, name: impl Into<String>) -> Self {
        self.network_name = Some(name.into());
        self
    }

    pub fn probe_horizons(mut self, probes: Vec<ProbeHorizon>) -> Self {
        self.probe_horizons = Some(probes);
        self
    }

    pub fn proxy_url(mut self, url: impl Into<String>) -> Self {
        self.proxy_url = Some(Some(url.into()));
        self
    }

    /// Sends requests without a proxy and skips the transport gate.
    pub fn direct(mut self) -> Self {
        self.proxy_url = Some(None);
        self
    }

    pub fn proxy_ready_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_ready_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = Some(path.into());
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn record_secrets(mut self, record: bool) -> Self {
        self.record_secrets = Some(record);
        self
    }

    pub fn build(self) -> Result<LoadConfig> {
        let params = LoadConfigParams {
            total_runs: self.total_runs.unwrap_or(DEFAULT_TOTAL_RUNS),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            per_request_delay: self
                .per_request_delay
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_PER_REQUEST_DELAY_MS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_backoff: self
                .retry_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS)),
            retry_exhaustion: self.retry_exhaustion.unwrap_or(Exhaustion::Propagate),
            confirm_timeout: self
                .confirm_timeout
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS)),
            confirm_poll_interval: self
                .confirm_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_CONFIRM_POLL_MS)),
            confirm_fault: self.confirm_fault.unwrap_or(ConfirmFaultPolicy::FailUnit),
            confirm_min_balance: self.confirm_min_balance.unwrap_or(0.0),
            friendbot_url: self
                .friendbot_url
                .unwrap_or_else(|| DEFAULT_FRIENDBOT_URL.to_owned()),
            horizon_url: self
                .horizon_url
                .unwrap_or_else(|| DEFAULT_HORIZON_URL.to_owned()),
            network_name: self
                .network_name
                .unwrap_or_else(|| DEFAULT_NETWORK_NAME.to_owned()),
            probe_horizons: self.probe_horizons.unwrap_or_default(),
            proxy_url: self
                .proxy_url
                .unwrap_or_else(|| Some(DEFAULT_PROXY_URL.to_owned())),
            proxy_ready_timeout: self
                .proxy_ready_timeout
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_PROXY_READY_TIMEOUT_MS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)),
            results_path: self
                .results_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_PATH)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            record_secrets: self.record_secrets.unwrap_or(false),
        };

        LoadConfig::new(params)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank variables both read as absent.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(key) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("failed to parse {key}='{value}'")),
            None => Ok(None),
        }
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}

fn parse_exhaustion(value: &str) -> Result<Exhaustion> {
    match value.to_ascii_lowercase().as_str() {
        "fail" | "propagate" => Ok(Exhaustion::Propagate),
        "skip" => Ok(Exhaustion::Skip),
        other => bail!("RETRY_EXHAUSTION must be 'fail' or 'skip', got '{other}'"),
    }
}

fn parse_confirm_fault(value: &str) -> Result<ConfirmFaultPolicy> {
    match value.to_ascii_lowercase().as_str() {
        "unit" => Ok(ConfirmFaultPolicy::FailUnit),
        "abort" => Ok(ConfirmFaultPolicy::AbortRun),
        other => bail!("CONFIRM_FAULT must be 'unit' or 'abort', got '{other}'"),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got '{other}'"),
    }
}

/// Parses `name=url,name=url`.
fn parse_probe_horizons(value: &str) -> Result<Vec<ProbeHorizon>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<ProbeHorizon> {
            let (name, url) = entry
                .split_once('=')
                .with_context(|| format!("PROBE_HORIZONS entry '{entry}' must be name=url"))?;
            Ok(ProbeHorizon {
                name: name.trim().to_owned(),
                url: url.trim().to_owned(),
            })
        })
        .collect()
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
