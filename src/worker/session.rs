//! Worker session: one pool connection and its work loop
//!
//! `Connecting → Handshaking → Working → Stopped`. The socket is owned by the
//! session task; the only state shared with the pool controller is the work
//! counter and the state cell, both atomic.

use super::WorkFunction;
use crate::protocol::{handshake, Command, Connection, Framing};
use crate::{Error, JobStatus, Result, ServerEndpoint, SessionId, Username};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// Lifecycle of a worker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Handshaking = 1,
    Working = 2,
    Stopped = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Handshaking,
            2 => SessionState::Working,
            _ => SessionState::Stopped,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Working => write!(f, "working"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Everything a session needs besides its id
#[derive(Clone)]
pub struct SessionContext {
    pub endpoint: ServerEndpoint,
    pub username: Username,
    pub framing: Framing,
    pub read_timeout: Option<Duration>,
    /// Upper bound on the whole handshake exchange
    pub handshake_timeout: Duration,
    pub work: Arc<dyn WorkFunction>,
    /// Receives errors that must end the whole process
    pub fatal_tx: mpsc::UnboundedSender<Error>,
}

#[derive(Debug)]
struct SessionShared {
    work_count: AtomicU64,
    completed: AtomicU64,
    state: AtomicU8,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            work_count: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn record_unit(&self) {
        self.work_count.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// One independent connection performing work for the pool user
pub struct WorkerSession {
    id: SessionId,
    shared: Arc<SessionShared>,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSession {
    /// Open the connection and start the session task.
    ///
    /// A connection failure is returned to the caller and no session exists.
    pub async fn connect(id: SessionId, ctx: SessionContext) -> Result<Self> {
        let shared = Arc::new(SessionShared::new());
        let conn = Connection::open(&ctx.endpoint, ctx.framing, ctx.read_timeout).await?;
        let cancellation = CancellationToken::new();

        let span = info_span!("session", session_id = %id, peer = conn.peer());
        let handle = tokio::spawn(
            Self::run(conn, ctx, Arc::clone(&shared), cancellation.clone()).instrument(span),
        );

        Ok(Self {
            id,
            shared,
            cancellation,
            handle: Some(handle),
        })
    }

    /// Slot index of this session
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Units of work completed since the last reset
    pub fn work_count(&self) -> u64 {
        self.shared.work_count.load(Ordering::Relaxed)
    }

    /// Zero the work counter
    pub fn reset_work_count(&self) {
        self.shared.work_count.store(0, Ordering::Relaxed);
    }

    /// Read and zero the counter in one atomic step
    pub fn take_work_count(&self) -> u64 {
        self.shared.work_count.swap(0, Ordering::Relaxed)
    }

    /// Units of work completed over the session's lifetime
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Whether the session task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the session and wait for its task.
    ///
    /// Cancellation interrupts any pending read; the socket is closed before
    /// this returns. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(session_id = %self.id, "Session task failed: {}", e);
            }
        }
        self.shared.set_state(SessionState::Stopped);
    }

    async fn run(
        conn: Connection,
        ctx: SessionContext,
        shared: Arc<SessionShared>,
        cancellation: CancellationToken,
    ) {
        let result = tokio::select! {
            result = Self::drive(conn, &ctx, &shared, cancellation.clone()) => result,
            _ = cancellation.cancelled() => Err(Error::cancelled("worker session")),
        };
        shared.set_state(SessionState::Stopped);

        match result {
            Ok(()) => debug!("Session finished"),
            Err(Error::Cancelled { .. }) => debug!("Session stopped"),
            Err(e) if e.is_fatal() => {
                error!("Session hit a fatal error: {}", e);
                let _ = ctx.fatal_tx.send(e);
            }
            Err(e) if e.is_retryable() => warn!(category = e.category(), "Session stopped: {}", e),
            Err(e) => error!(category = e.category(), "Session failed: {}", e),
        }
    }

    /// Handshake, then work until the connection fails
    async fn drive(
        mut conn: Connection,
        ctx: &SessionContext,
        shared: &SessionShared,
        cancel: CancellationToken,
    ) -> Result<()> {
        shared.set_state(SessionState::Handshaking);
        handshake::perform_within(&mut conn, &ctx.username, ctx.handshake_timeout).await?;

        shared.set_state(SessionState::Working);
        debug!(work = ctx.work.name(), "Session working");

        loop {
            let job = handshake::request_job(&mut conn, &ctx.username).await?;

            let work = Arc::clone(&ctx.work);
            // The blocking task outlives a cancelled session unless told to stop
            let cancel = cancel.clone();
            let answer = tokio::task::spawn_blocking(move || work.solve(&job, &cancel))
                .await
                .map_err(|e| Error::worker(ctx.work.name(), e.to_string()))??;

            let status = handshake::submit_answer(&mut conn, &ctx.username, Command::Answer(answer)).await?;
            if status == JobStatus::Bad {
                debug!("Answer rejected by pool");
            }
            shared.record_unit();
        }
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

impl fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("work_count", &self.work_count())
            .finish()
    }
}
