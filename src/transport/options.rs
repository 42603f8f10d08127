//! Configurable knobs for the shared HTTP transport along with validation
//! helpers so callers can reason about proxying and request timeouts.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_PROXY_URL: &str = "socks5h://127.0.0.1:3000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POOL_IDLE_PER_HOST: usize = 64;

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub proxy_url: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            proxy_url: Some(DEFAULT_PROXY_URL.to_owned()),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            pool_max_idle_per_host: DEFAULT_POOL_IDLE_PER_HOST,
        }
    }
}

impl TransportOptions {
    /// Options for a direct (unproxied) transport, mostly useful against local servers.
    pub fn direct() -> Self {
        Self {
            proxy_url: None,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }
        if let Some(proxy) = &self.proxy_url {
            let proxy = proxy.trim();
            if !(proxy.starts_with("socks5://")
                || proxy.starts_with("socks5h://")
                || proxy.starts_with("http://")
                || proxy.starts_with("https://"))
            {
                bail!("proxy_url must use socks5://, socks5h://, http:// or https://");
            }
        }
        Ok(())
    }
}
