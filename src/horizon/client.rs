//! HTTP clients for the faucet and Horizon endpoints plus the trait seams the
//! engine consumes. Every request snapshots the shared transport once, so a
//! concurrent rotation never affects a request that is already in flight.

use crate::horizon::metrics::{HttpMetrics, HttpMetricsSnapshot};
use crate::horizon::payload::{
    AccountRecord, FundingReceipt, ProblemDocument, SignedEnvelope, SubmitReceipt,
};
use crate::transport::TransportHandle;
use anyhow::Result;
use futures::future::BoxFuture;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

const FRIENDBOT: &str = "friendbot";
const LOAD_ACCOUNT: &str = "load_account";
const SUBMIT: &str = "submit_transaction";

#[derive(Debug)]
pub enum HorizonError {
    Timeout { endpoint: &'static str },
    Transport { endpoint: &'static str, detail: String },
    NotFound { endpoint: &'static str },
    Rejected { endpoint: &'static str, status: u16, reason: String },
    Status { endpoint: &'static str, status: u16 },
    Decode { endpoint: &'static str, detail: String },
}

impl fmt::Display for HorizonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HorizonError::Timeout { endpoint } => write!(f, "{endpoint} request timed out"),
            HorizonError::Transport { endpoint, detail } => {
                write!(f, "{endpoint} transport failure: {detail}")
            }
            HorizonError::NotFound { endpoint } => write!(f, "{endpoint} resource not found"),
            HorizonError::Rejected {
                endpoint,
                status,
                reason,
            } => write!(f, "{endpoint} rejected with status {status}: {reason}"),
            HorizonError::Status { endpoint, status } => {
                write!(f, "{endpoint} failed with status {status}")
            }
            HorizonError::Decode { endpoint, detail } => {
                write!(f, "{endpoint} returned an undecodable body: {detail}")
            }
        }
    }
}

impl std::error::Error for HorizonError {}

/// True when `err` is the well-defined "not observable yet" condition.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<HorizonError>(),
        Some(HorizonError::NotFound { .. })
    )
}

pub trait FundingEndpoint: Send + Sync {
    /// Requests funding for `public_id`, returning the funding transaction hash.
    fn fund<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<String>>;
}

pub trait AccountReader: Send + Sync {
    fn load_account<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<AccountRecord>>;
}

pub trait SubmitEndpoint: Send + Sync {
    fn submit<'a>(&'a self, envelope: &'a SignedEnvelope) -> BoxFuture<'a, Result<SubmitReceipt>>;
}

#[derive(Debug, Clone)]
pub struct FriendbotClient {
    base_url: Arc<String>,
    transport: Arc<TransportHandle>,
    metrics: Arc<HttpMetrics>,
}

impl FriendbotClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<TransportHandle>) -> Self {
        Self {
            base_url: Arc::new(base_url.into()),
            transport,
            metrics: Arc::new(HttpMetrics::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> HttpMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn fund(&self, public_id: &str) -> Result<String> {
        let client = self.transport.current();
        let request = client
            .get(self.base_url.as_str())
            .query(&[("addr", public_id)]);
        let receipt: FundingReceipt = execute_json(&self.metrics, FRIENDBOT, request).await?;
        Ok(receipt.hash)
    }
}

impl FundingEndpoint for FriendbotClient {
    fn fund<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.fund(public_id))
    }
}

#[derive(Debug, Clone)]
pub struct HorizonClient {
    base_url: Arc<String>,
    transport: Arc<TransportHandle>,
    metrics: Arc<HttpMetrics>,
}

impl HorizonClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<TransportHandle>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            base_url: Arc::new(base_url),
            transport,
            metrics: Arc::new(HttpMetrics::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> HttpMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn load_account(&self, public_id: &str) -> Result<AccountRecord> {
        let client = self.transport.current();
        let url = format!("{}/accounts/{}", self.base_url, public_id);
        execute_json(&self.metrics, LOAD_ACCOUNT, client.get(url)).await
    }

    pub async fn submit(&self, envelope: &SignedEnvelope) -> Result<SubmitReceipt> {
        let client = self.transport.current();
        let url = format!("{}/transactions", self.base_url);
        let request = client.post(url).form(&[("tx", envelope.xdr.as_str())]);
        execute_json(&self.metrics, SUBMIT, request).await
    }
}

impl AccountReader for HorizonClient {
    fn load_account<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<AccountRecord>> {
        Box::pin(self.load_account(public_id))
    }
}

impl SubmitEndpoint for HorizonClient {
    fn submit<'a>(&'a self, envelope: &'a SignedEnvelope) -> BoxFuture<'a, Result<SubmitReceipt>> {
        Box::pin(self.submit(envelope))
    }
}

async fn execute_json<R>(
    metrics: &HttpMetrics,
    endpoint: &'static str,
    request: RequestBuilder,
) -> Result<R>
where
    R: DeserializeOwned,
{
    let start = Instant::now();

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            let mapped = map_transport_error(endpoint, &err);
            if matches!(mapped, HorizonError::Timeout { .. }) {
                metrics.record_timeout(start.elapsed());
            } else {
                metrics.record_failure(start.elapsed());
            }
            return Err(mapped.into());
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            metrics.record_failure(start.elapsed());
            return Err(map_transport_error(endpoint, &err).into());
        }
    };

    if !status.is_success() {
        // a missing resource is an expected answer while waiting for propagation
        if status == StatusCode::NOT_FOUND {
            metrics.record_success(start.elapsed());
        } else {
            metrics.record_failure(start.elapsed());
        }
        return Err(map_status(endpoint, status, &body).into());
    }

    metrics.record_success(start.elapsed());
    serde_json::from_str(&body).map_err(|err| {
        HorizonError::Decode {
            endpoint,
            detail: err.to_string(),
        }
        .into()
    })
}

fn map_transport_error(endpoint: &'static str, err: &reqwest::Error) -> HorizonError {
    if err.is_timeout() {
        HorizonError::Timeout { endpoint }
    } else if err.is_decode() {
        HorizonError::Decode {
            endpoint,
            detail: err.to_string(),
        }
    } else {
        HorizonError::Transport {
            endpoint,
            detail: err.to_string(),
        }
    }
}

fn map_status(endpoint: &'static str, status: StatusCode, body: &str) -> HorizonError {
    match status {
        StatusCode::NOT_FOUND => HorizonError::NotFound { endpoint },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => HorizonError::Status {
            endpoint,
            status: status.as_u16(),
        },
        status if status.is_client_error() => {
            let reason = ProblemDocument::parse(body)
                .and_then(|problem| problem.reason())
                .unwrap_or_else(|| truncate(body, 200));
            HorizonError::Rejected {
                endpoint,
                status: status.as_u16(),
                reason,
            }
        }
        status => HorizonError::Status {
            endpoint,
            status: status.as_u16(),
        },
    }
}

fn truncate(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_owned(),
    }
}
