//! Process-wide HTTP client slot that can be rebuilt after transport failures.
//!
//! Readers take an `Arc` snapshot once per request. Rotation swaps the slot
//! contents; requests already holding the previous client keep running on it
//! and finish (or fail) on their own.

use crate::transport::options::TransportOptions;
use anyhow::{Context, Result};
use reqwest::{Client, Proxy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
pub struct TransportHandle {
    options: TransportOptions,
    slot: RwLock<Arc<Client>>,
    generation: AtomicU64,
}

impl TransportHandle {
    pub fn new(options: TransportOptions) -> Result<Self> {
        options.validate()?;
        let client = build_client(&options)?;
        Ok(Self {
            options,
            slot: RwLock::new(Arc::new(client)),
            generation: AtomicU64::new(0),
        })
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Snapshot of the current client. Do not hold it across unrelated requests.
    pub fn current(&self) -> Arc<Client> {
        self.slot
            .read()
            .expect("transport slot lock poisoned")
            .clone()
    }

    /// Number of completed rotations.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Builds a fresh client (new proxy circuit, empty connection pool) and
    /// installs it for future requests. Returns the new generation.
    pub fn rotate(&self) -> Result<u64> {
        let client = build_client(&self.options).context("failed to rebuild HTTP transport")?;
        {
            let mut slot = self.slot.write().expect("transport slot lock poisoned");
            *slot = Arc::new(client);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            generation,
            proxied = self.options.proxy_url.is_some(),
            "rotated shared HTTP transport"
        );
        Ok(generation)
    }
}

fn build_client(options: &TransportOptions) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(options.request_timeout)
        .connect_timeout(options.connect_timeout)
        .pool_max_idle_per_host(options.pool_max_idle_per_host);

    if let Some(proxy_url) = &options.proxy_url {
        let proxy = Proxy::all(proxy_url.trim())
            .with_context(|| format!("invalid proxy url {proxy_url}"))?;
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder.build().context("failed to build HTTP client")
}
