//! Connectivity probe for the cloud backend

use crossbeam_channel::bounded;
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Answers whether a network path to the cloud backend is usable right now
pub trait ConnectivityProbe: Send + Sync {
    /// Single reachability check. Never blocks longer than `timeout`; any
    /// failure is reported as `false`.
    fn is_available(&self, timeout: Duration) -> bool;
}

/// Blocking reachability check; receives the overall deadline
type ReachabilityCheck = dyn Fn(Duration) -> bool + Send + Sync;

/// Resolves a well-known host and opens a TCP connection to it.
///
/// The check runs on a detached thread and the deadline is enforced by the
/// caller side, so a lookup that never returns cannot stall a capture.
#[derive(Clone)]
pub struct TcpProbe {
    target: String,
    check: Arc<ReachabilityCheck>,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let target = format!("{}:{}", host, port);
        Self::with_check(target, move |timeout| tcp_reachable(&host, port, timeout))
    }

    /// Probe with a custom blocking check in place of DNS + TCP
    pub fn with_check(
        target: impl Into<String>,
        check: impl Fn(Duration) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            target: target.into(),
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for TcpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpProbe").field("target", &self.target).finish()
    }
}

impl ConnectivityProbe for TcpProbe {
    fn is_available(&self, timeout: Duration) -> bool {
        let (tx, rx) = bounded(1);
        let check = self.check.clone();
        let started = Instant::now();

        let spawned = std::thread::Builder::new()
            .name("connectivity-probe".to_string())
            .spawn(move || {
                let _ = tx.send(check(timeout));
            });

        if spawned.is_err() {
            return false;
        }

        let available = rx.recv_timeout(timeout).unwrap_or(false);
        debug!(
            "Connectivity probe {} -> {} in {:?}",
            self.target,
            available,
            started.elapsed()
        );
        available
    }
}

/// DNS lookup then a TCP connect, sharing one deadline
fn tcp_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    let started = Instant::now();
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| {
            let remaining = timeout.saturating_sub(started.elapsed());
            !remaining.is_zero() && TcpStream::connect_timeout(&addr, remaining).is_ok()
        })
        .unwrap_or(false)
}
