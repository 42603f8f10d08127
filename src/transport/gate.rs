//! Pre-flight connectivity check for the local proxy the transport depends on.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout, Instant};

const PROBE_INTERVAL: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum GateError {
    Timeout { target: String, waited: Duration },
    InvalidTarget { target: String, detail: String },
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Timeout { target, waited } => write!(
                f,
                "transport dependency {target} not reachable after {}ms",
                waited.as_millis()
            ),
            GateError::InvalidTarget { target, detail } => {
                write!(f, "transport gate target {target} does not resolve: {detail}")
            }
        }
    }
}

impl std::error::Error for GateError {}

/// Waits until a TCP connection to `target` succeeds or `deadline` elapses.
///
/// The target is resolved once up front; a target that is not `host:port` or
/// whose host does not resolve fails with [`GateError::InvalidTarget`] without
/// waiting. Every probe connection is dropped as soon as it resolves. Nothing
/// else is touched, so a failure here means no work has been attempted yet.
pub async fn await_ready(target: &str, deadline: Duration) -> Result<(), GateError> {
    let started = Instant::now();
    let addrs = resolve(target, deadline).await?;
    let mut probes = 0u32;

    loop {
        probes += 1;
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addrs.as_slice())).await {
            Ok(Ok(stream)) => {
                drop(stream);
                tracing::info!(target, probes, "transport dependency is reachable");
                return Ok(());
            }
            Ok(Err(err)) => {
                tracing::debug!(target, probes, error = %err, "transport probe failed");
            }
            Err(_) => {
                tracing::debug!(target, probes, "transport probe timed out");
            }
        }

        let waited = started.elapsed();
        if waited >= deadline {
            return Err(GateError::Timeout {
                target: target.to_owned(),
                waited,
            });
        }
        sleep(PROBE_INTERVAL.min(deadline - waited)).await;
    }
}

async fn resolve(target: &str, deadline: Duration) -> Result<Vec<SocketAddr>, GateError> {
    let invalid = |detail: String| GateError::InvalidTarget {
        target: target.to_owned(),
        detail,
    };

    match timeout(deadline, lookup_host(target)).await {
        Ok(Ok(addrs)) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(invalid("no addresses".to_owned()))
            } else {
                Ok(addrs)
            }
        }
        Ok(Err(err)) => Err(invalid(err.to_string())),
        Err(_) => Err(GateError::Timeout {
            target: target.to_owned(),
            waited: deadline,
        }),
    }
}
