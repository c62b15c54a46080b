//! In-process mock pool server for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use pool_miner::ServerEndpoint;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Shared {
    status: Mutex<String>,
    balances: Mutex<VecDeque<String>>,
    stalled: AtomicBool,
    /// Appended to the banner and every reply
    terminator: &'static str,
    accepted: AtomicUsize,
    closed: AtomicUsize,
    statuses: AtomicUsize,
}

/// Answers `JOB,<user>` with a job, anything else with the configured
/// status, and `BALA` from a queue of canned balances
#[derive(Clone)]
pub struct MockPool {
    endpoint: ServerEndpoint,
    shared: Arc<Shared>,
}

impl MockPool {
    /// Newline-terminated frames
    pub async fn start(status: &str) -> Self {
        Self::start_with(status, "\n").await
    }

    /// Frames without any terminator, as legacy servers send them
    pub async fn start_unterminated(status: &str) -> Self {
        Self::start_with(status, "").await
    }

    async fn start_with(status: &str, terminator: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared {
            status: Mutex::new(status.to_string()),
            balances: Mutex::new(VecDeque::new()),
            stalled: AtomicBool::new(false),
            terminator,
            accepted: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            statuses: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_shared)));
            }
        });

        Self {
            endpoint: ServerEndpoint::new("127.0.0.1", port),
            shared,
        }
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        self.endpoint.clone()
    }

    /// Stop answering job and status requests; connections stay open
    pub fn set_stalled(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn push_balance(&self, response: &str) {
        self.shared.balances.lock().push_back(response.to_string());
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Connections the client has closed
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Status responses sent, handshake acknowledgments included
    pub fn statuses(&self) -> usize {
        self.shared.statuses.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>) {
    let banner = format!("2.7{}", shared.terminator);
    if stream.write_all(banner.as_bytes()).await.is_err() {
        shared.closed.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let mut buf = [0u8; 512];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => {
                shared.closed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(n) => n,
        };
        let request = String::from_utf8_lossy(&buf[..n]).trim().to_string();

        let reply = if request == "BALA" {
            shared.balances.lock().pop_front().unwrap_or_default()
        } else if shared.stalled.load(Ordering::SeqCst) {
            continue;
        } else if request.starts_with("JOB,") {
            "job,payload,1".to_string()
        } else {
            shared.statuses.fetch_add(1, Ordering::SeqCst);
            shared.status.lock().clone()
        };

        let frame = format!("{}{}", reply, shared.terminator);
        if stream.write_all(frame.as_bytes()).await.is_err() {
            shared.closed.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
