use std::{
    collections::{HashMap, HashSet, VecDeque},
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const FUNDED_BALANCE: &str = "10000.0000000";

/// In-memory ledger shared by the faucet and Horizon routes.
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<MockNetworkInner>,
}

#[derive(Default)]
struct MockNetworkInner {
    accounts: Mutex<HashMap<String, MockAccount>>,
    friendbot_faults: Mutex<VecDeque<u16>>,
    account_faults: Mutex<HashMap<String, VecDeque<u16>>>,
    hidden: Mutex<HashSet<String>>,
    submit_faults: Mutex<VecDeque<u16>>,
    submitted: Mutex<Vec<String>>,
    hide_accounts: AtomicBool,
    friendbot_requests: AtomicU64,
    account_reads: AtomicU64,
    submissions: AtomicU64,
}

#[derive(Clone)]
struct MockAccount {
    sequence: i64,
    balance: String,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_account(&self, public_id: &str, sequence: i64, balance: &str) {
        self.inner
            .accounts
            .lock()
            .expect("mock accounts poisoned")
            .insert(
                public_id.to_owned(),
                MockAccount {
                    sequence,
                    balance: balance.to_owned(),
                },
            );
    }

    /// Answers the next faucet requests with these statuses, in order.
    pub fn fail_friendbot(&self, statuses: impl IntoIterator<Item = u16>) {
        self.inner
            .friendbot_faults
            .lock()
            .expect("mock faults poisoned")
            .extend(statuses);
    }

    /// Answers the next faucet requests for `public_id` with these statuses,
    /// leaving every other account untouched.
    pub fn fail_friendbot_for(&self, public_id: &str, statuses: impl IntoIterator<Item = u16>) {
        self.inner
            .account_faults
            .lock()
            .expect("mock faults poisoned")
            .entry(public_id.to_owned())
            .or_default()
            .extend(statuses);
    }

    /// Funding `public_id` succeeds but reads never see it.
    pub fn hide_account(&self, public_id: &str) {
        self.inner
            .hidden
            .lock()
            .expect("mock hidden accounts poisoned")
            .insert(public_id.to_owned());
    }

    pub fn fail_submissions(&self, statuses: impl IntoIterator<Item = u16>) {
        self.inner
            .submit_faults
            .lock()
            .expect("mock faults poisoned")
            .extend(statuses);
    }

    /// Funded accounts stay invisible to account reads.
    pub fn hide_accounts(&self, hide: bool) {
        self.inner.hide_accounts.store(hide, Ordering::SeqCst);
    }

    pub fn friendbot_requests(&self) -> u64 {
        self.inner.friendbot_requests.load(Ordering::SeqCst)
    }

    pub fn account_reads(&self) -> u64 {
        self.inner.account_reads.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> u64 {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    pub fn submitted_envelopes(&self) -> Vec<String> {
        self.inner
            .submitted
            .lock()
            .expect("mock submissions poisoned")
            .clone()
    }

    pub fn account_count(&self) -> usize {
        self.inner
            .accounts
            .lock()
            .expect("mock accounts poisoned")
            .len()
    }

    fn next_fault(queue: &Mutex<VecDeque<u16>>) -> Option<u16> {
        queue.lock().expect("mock faults poisoned").pop_front()
    }

    fn fund(&self, query: Option<&str>) -> (StatusCode, Value) {
        let n = self.inner.friendbot_requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(status) = Self::next_fault(&self.inner.friendbot_faults) {
            return problem(status, "createAccountAlreadyExist", None);
        }
        let Some(addr) = query_param(query, "addr") else {
            return problem(400, "missing addr", None);
        };
        let account_fault = self
            .inner
            .account_faults
            .lock()
            .expect("mock faults poisoned")
            .get_mut(&addr)
            .and_then(VecDeque::pop_front);
        if let Some(status) = account_fault {
            return problem(status, "faucet unavailable", None);
        }

        self.seed_account(&addr, 4_294_967_296, FUNDED_BALANCE);
        (
            StatusCode::OK,
            json!({ "hash": format!("{n:064x}"), "successful": true }),
        )
    }

    fn load_account(&self, public_id: &str) -> (StatusCode, Value) {
        self.inner.account_reads.fetch_add(1, Ordering::SeqCst);
        let hidden = self.inner.hide_accounts.load(Ordering::SeqCst)
            || self
                .inner
                .hidden
                .lock()
                .expect("mock hidden accounts poisoned")
                .contains(public_id);
        if hidden {
            return problem(404, "Resource Missing", None);
        }
        let account = self
            .inner
            .accounts
            .lock()
            .expect("mock accounts poisoned")
            .get(public_id)
            .cloned();
        match account {
            Some(account) => (
                StatusCode::OK,
                json!({
                    "id": public_id,
                    "account_id": public_id,
                    "sequence": account.sequence.to_string(),
                    "balances": [
                        { "balance": account.balance, "asset_type": "native" }
                    ],
                }),
            ),
            None => problem(404, "Resource Missing", None),
        }
    }

    fn submit(&self, form: &str) -> (StatusCode, Value) {
        let n = self.inner.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = query_param(Some(form), "tx").unwrap_or_default();
        self.inner
            .submitted
            .lock()
            .expect("mock submissions poisoned")
            .push(tx);
        if let Some(status) = Self::next_fault(&self.inner.submit_faults) {
            return problem(
                status,
                "The transaction failed when submitted to the network.",
                Some(json!({ "transaction": "tx_bad_seq" })),
            );
        }
        (
            StatusCode::OK,
            json!({ "hash": format!("{n:064x}"), "ledger": 7 }),
        )
    }
}

pub struct MockHorizonServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockHorizonServer {
    pub async fn start(network: MockNetwork) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock Horizon listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let network = network.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(network.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock Horizon server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    network: MockNetwork,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);

    let (status, payload) = match (method, path.as_str()) {
        (Method::GET, "/friendbot") | (Method::GET, "/friendbot/") => {
            network.fund(query.as_deref())
        }
        (Method::GET, path) if path.starts_with("/accounts/") => {
            network.load_account(path.trim_start_matches("/accounts/"))
        }
        (Method::POST, "/transactions") => match body::to_bytes(req.into_body()).await {
            Ok(bytes) => network.submit(&String::from_utf8_lossy(&bytes)),
            Err(err) => problem(400, &format!("failed to read body: {err}"), None),
        },
        _ => problem(404, "Resource Missing", None),
    };

    let mut response = Response::new(Body::from(payload.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn problem(status: u16, detail: &str, result_codes: Option<Value>) -> (StatusCode, Value) {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "title": status.canonical_reason().unwrap_or("Error"),
        "status": status.as_u16(),
        "detail": detail,
    });
    if let Some(codes) = result_codes {
        body["extras"] = json!({ "result_codes": codes });
    }
    (status, body)
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.to_owned())
}
