//! Session pool controller
//!
//! Owns the fixed set of worker sessions and the pool state machine:
//! `Idle → Starting → Running → Restarting → Running | Fatal`, plus `Stopped`.
//! All slot mutation happens under one async mutex, and the monitor runs
//! restarts inline, so `start`, `stop` and `restart` never overlap.

use crate::protocol::{handshake, Connection, Framing};
use crate::resolver::EndpointResolver;
use crate::telemetry::{ErrorReport, PoolEvent, Telemetry, ThroughputSample, TracingTelemetry};
use crate::worker::{SessionContext, WorkFunction, WorkerSession};
use crate::{Error, Result, ServerEndpoint, SessionId, Username};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables for a [`SessionPool`]
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// Number of parallel sessions
    pub sessions: usize,
    pub framing: Framing,
    /// Per-read timeout, `None` waits indefinitely
    pub read_timeout: Option<Duration>,
    /// Bound on each handshake, so a silent server fails the attempt
    pub handshake_timeout: Duration,
    /// Throughput sampling period
    pub monitor_interval: Duration,
    /// Wait before each restart attempt
    pub restart_delay: Duration,
    /// Pause between consecutive session connects
    pub stagger: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            sessions: 1,
            framing: Framing::default(),
            read_timeout: None,
            handshake_timeout: Duration::from_secs(2),
            monitor_interval: Duration::from_secs(1),
            restart_delay: Duration::from_secs(5),
            stagger: Duration::from_secs(1),
        }
    }
}

/// Pool state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Idle,
    Starting,
    Running,
    Restarting,
    Fatal,
    Stopped,
}

impl fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolPhase::Idle => "idle",
            PoolPhase::Starting => "starting",
            PoolPhase::Running => "running",
            PoolPhase::Restarting => "restarting",
            PoolPhase::Fatal => "fatal",
            PoolPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct PoolState {
    /// Empty after stop or restart; otherwise one entry per session,
    /// `None` once a dead session has been reaped
    slots: Vec<Option<WorkerSession>>,
    endpoint: Option<ServerEndpoint>,
    sampled_at: Instant,
}

impl PoolState {
    fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Runs N worker sessions for one user and keeps them alive
pub struct SessionPool {
    username: Username,
    resolver: Arc<dyn EndpointResolver>,
    work: Arc<dyn WorkFunction>,
    settings: PoolSettings,
    telemetry: Arc<dyn Telemetry>,
    state: Mutex<PoolState>,
    phase: RwLock<PoolPhase>,
    restarts: AtomicU64,
    fatal_tx: mpsc::UnboundedSender<Error>,
    fatal_rx: Mutex<mpsc::UnboundedReceiver<Error>>,
}

impl SessionPool {
    /// Create an idle pool with default settings and tracing telemetry
    pub fn new(
        username: Username,
        resolver: Arc<dyn EndpointResolver>,
        work: Arc<dyn WorkFunction>,
    ) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            username,
            resolver,
            work,
            settings: PoolSettings::default(),
            telemetry: Arc::new(TracingTelemetry),
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                endpoint: None,
                sampled_at: Instant::now(),
            }),
            phase: RwLock::new(PoolPhase::Idle),
            restarts: AtomicU64::new(0),
            fatal_tx,
            fatal_rx: Mutex::new(fatal_rx),
        }
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the telemetry sink
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn phase(&self) -> PoolPhase {
        *self.phase.read()
    }

    /// Restarts begun since creation
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Number of occupied slots
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.slots.iter().flatten().count()
    }

    /// Endpoint of the current generation of sessions
    pub async fn endpoint(&self) -> Option<ServerEndpoint> {
        self.state.lock().await.endpoint.clone()
    }

    fn set_phase(&self, phase: PoolPhase) {
        let mut current = self.phase.write();
        if *current != phase {
            debug!(from = %*current, to = %phase, "Pool phase");
            *current = phase;
        }
    }

    /// Resolve, validate the username and open all sessions.
    ///
    /// Fails without retrying; sessions created before the failure are
    /// stopped again.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.is_empty() {
            return Err(Error::invalid_state("pool already has live sessions"));
        }

        match self.start_locked(&mut state).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_phase(if e.is_fatal() {
                    PoolPhase::Fatal
                } else {
                    PoolPhase::Idle
                });
                Err(e)
            }
        }
    }

    async fn start_locked(&self, state: &mut PoolState) -> Result<()> {
        if self.settings.sessions == 0 {
            return Err(Error::config("pool needs at least one session"));
        }
        self.set_phase(PoolPhase::Starting);

        let endpoint = self.resolver.resolve().await;
        if !endpoint.is_resolved() {
            return Err(Error::resolution("pool endpoint could not be resolved"));
        }
        info!(endpoint = %endpoint, "Starting {} sessions", self.settings.sessions);

        self.validate_username(&endpoint).await?;

        let ctx = SessionContext {
            endpoint: endpoint.clone(),
            username: self.username.clone(),
            framing: self.settings.framing,
            read_timeout: self.settings.read_timeout,
            handshake_timeout: self.settings.handshake_timeout,
            work: Arc::clone(&self.work),
            fatal_tx: self.fatal_tx.clone(),
        };

        let mut sessions = Vec::with_capacity(self.settings.sessions);
        for index in 0..self.settings.sessions {
            if index > 0 && !self.settings.stagger.is_zero() {
                sleep(self.settings.stagger).await;
            }

            match WorkerSession::connect(SessionId::new(index), ctx.clone()).await {
                Ok(session) => sessions.push(Some(session)),
                Err(e) => {
                    warn!(session_id = index, "Session failed to connect: {}", e);
                    for session in sessions.iter_mut().flatten() {
                        session.stop().await;
                    }
                    return Err(e);
                }
            }
        }

        state.slots = sessions;
        state.endpoint = Some(endpoint.clone());
        state.sampled_at = Instant::now();
        self.set_phase(PoolPhase::Running);
        self.telemetry.event(PoolEvent::Started {
            endpoint,
            sessions: self.settings.sessions,
        });
        Ok(())
    }

    /// Full handshake on a throwaway connection
    async fn validate_username(&self, endpoint: &ServerEndpoint) -> Result<()> {
        let mut conn =
            Connection::open(endpoint, self.settings.framing, self.settings.read_timeout).await?;
        let outcome =
            handshake::perform_within(&mut conn, &self.username, self.settings.handshake_timeout)
                .await?;
        debug!(
            server_version = %outcome.server_version,
            status = %outcome.status,
            "Username accepted"
        );
        Ok(())
    }

    /// Take and zero every session's counter and report the aggregate.
    ///
    /// Sessions whose task has exited are reaped after their final count
    /// is collected.
    pub async fn sample(&self) -> ThroughputSample {
        let mut state = self.state.lock().await;
        let mut per_session = Vec::with_capacity(state.slots.len());

        for slot in state.slots.iter_mut() {
            let Some(session) = slot.as_ref() else {
                per_session.push(0);
                continue;
            };
            let finished = session.is_finished();
            per_session.push(session.take_work_count());

            if finished {
                if let Some(mut session) = slot.take() {
                    warn!(session_id = %session.id(), "Session exited, slot cleared");
                    session.stop().await;
                }
            }
        }

        let now = Instant::now();
        let interval = now.duration_since(state.sampled_at);
        state.sampled_at = now;

        let sample = ThroughputSample {
            total: per_session.iter().sum(),
            per_session,
            interval,
        };
        self.telemetry.throughput(sample.clone());
        sample
    }

    /// Tear down every session and start again after the restart delay.
    ///
    /// Start failures are reported and retried with the same delay until
    /// one succeeds, the username is rejected, or `shutdown` fires.
    pub async fn restart(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let restart = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = self.settings.restart_delay;

        self.set_phase(PoolPhase::Restarting);
        Self::stop_sessions(&mut state).await;
        self.telemetry.event(PoolEvent::Restarting { restart, delay });

        let mut attempt = 0u64;
        loop {
            attempt += 1;

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(Error::cancelled("pool restart")),
            }

            let result = tokio::select! {
                result = self.start_locked(&mut state) => result,
                _ = shutdown.cancelled() => Err(Error::cancelled("pool restart")),
            };

            match result {
                Ok(()) => {
                    self.telemetry.event(PoolEvent::Restarted {
                        restart,
                        attempts: attempt,
                    });
                    return Ok(());
                }
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) if e.is_fatal() => {
                    self.set_phase(PoolPhase::Fatal);
                    self.telemetry
                        .error(ErrorReport::new(format!("restart #{}", restart), &e));
                    return Err(e);
                }
                Err(e) => {
                    self.set_phase(PoolPhase::Restarting);
                    self.telemetry.error(ErrorReport::new(
                        format!("restart #{} attempt {}", restart, attempt),
                        &e,
                    ));
                    self.telemetry
                        .event(PoolEvent::RestartAttemptFailed { restart, attempt });
                }
            }
        }
    }

    /// Stop every session and clear the slots. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let had_sessions = !state.slots.is_empty();
        Self::stop_sessions(&mut state).await;

        let phase = self.phase();
        if !had_sessions && matches!(phase, PoolPhase::Stopped | PoolPhase::Fatal) {
            return;
        }
        if phase != PoolPhase::Fatal {
            self.set_phase(PoolPhase::Stopped);
        }
        self.telemetry.event(PoolEvent::Stopped);
    }

    async fn stop_sessions(state: &mut PoolState) {
        for slot in state.slots.iter_mut() {
            if let Some(mut session) = slot.take() {
                session.stop().await;
            }
        }
        state.slots.clear();
    }

    /// Start the pool and monitor it until shutdown or a fatal error.
    ///
    /// A failed initial start is returned as is. A zero throughput sample
    /// triggers [`restart`](Self::restart). Sessions are always stopped
    /// before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut fatal_rx = self.fatal_rx.lock().await;

        let started = tokio::select! {
            result = self.start() => result,
            _ = shutdown.cancelled() => Err(Error::cancelled("pool start")),
        };
        if let Err(e) = started {
            self.stop().await;
            return match e {
                Error::Cancelled { .. } => Ok(()),
                e => {
                    self.telemetry.error(ErrorReport::new("pool start", &e));
                    Err(e)
                }
            };
        }

        let period = self.settings.monitor_interval;
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                Some(e) = fatal_rx.recv() => {
                    self.set_phase(PoolPhase::Fatal);
                    self.telemetry.error(ErrorReport::new("worker session", &e));
                    break Err(e);
                }
                _ = ticker.tick() => {
                    let sample = self.sample().await;
                    if !sample.is_stalled() {
                        continue;
                    }

                    self.telemetry.event(PoolEvent::Stalled);
                    match self.restart(&shutdown).await {
                        Ok(()) => ticker.reset(),
                        Err(Error::Cancelled { .. }) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        self.stop().await;
        result
    }
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("username", &self.username)
            .field("work", &self.work.name())
            .field("settings", &self.settings)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticEndpointResolver;
    use crate::telemetry::MemoryTelemetry;
    use crate::worker::ConstantDelayWork;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings(sessions: usize) -> PoolSettings {
        PoolSettings {
            sessions,
            stagger: Duration::ZERO,
            monitor_interval: Duration::from_millis(100),
            restart_delay: Duration::from_millis(50),
            ..PoolSettings::default()
        }
    }

    fn pool_for(endpoint: ServerEndpoint, sessions: usize) -> (SessionPool, Arc<MemoryTelemetry>) {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let pool = SessionPool::new(
            Username::new("alice").unwrap(),
            Arc::new(StaticEndpointResolver::new(endpoint)),
            Arc::new(ConstantDelayWork::new(Duration::ZERO)),
        )
        .with_settings(settings(sessions))
        .with_telemetry(telemetry.clone());
        (pool, telemetry)
    }

    /// Accepts connections and answers every request with a job and `GOOD`
    /// after the banner
    async fn good_server() -> ServerEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if stream.write_all(b"2.7\n").await.is_err() {
                        return;
                    }
                    let mut buf = [0u8; 256];
                    let mut request_job = true;
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {}
                        }
                        let reply: &[u8] = if request_job { b"job,1\n" } else { b"GOOD\n" };
                        request_job = !request_job;
                        if stream.write_all(reply).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                });
            }
        });
        ServerEndpoint::new("127.0.0.1", port)
    }

    /// Accepts connections, sends `banner` and never answers anything else
    async fn silent_server(banner: &'static [u8]) -> ServerEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if stream.write_all(banner).await.is_err() {
                        return;
                    }
                    let mut buf = [0u8; 256];
                    while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
                });
            }
        });
        ServerEndpoint::new("127.0.0.1", port)
    }

    fn silent_pool(endpoint: ServerEndpoint) -> (SessionPool, Arc<MemoryTelemetry>) {
        let (pool, telemetry) = pool_for(endpoint, 1);
        let settings = PoolSettings {
            handshake_timeout: Duration::from_millis(100),
            ..pool.settings().clone()
        };
        (pool.with_settings(settings), telemetry)
    }

    #[tokio::test]
    async fn test_unresolved_endpoint_fails_start() {
        let (pool, _) = pool_for(ServerEndpoint::unresolved(), 2);

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        assert_eq!(pool.phase(), PoolPhase::Idle);
        assert_eq!(pool.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_start_creates_sessions() {
        let (pool, telemetry) = pool_for(good_server().await, 3);

        pool.start().await.unwrap();
        assert_eq!(pool.phase(), PoolPhase::Running);
        assert_eq!(pool.session_count().await, 3);
        assert!(matches!(
            telemetry.events().first(),
            Some(PoolEvent::Started { sessions: 3, .. })
        ));

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        pool.stop().await;
        assert_eq!(pool.phase(), PoolPhase::Stopped);
        assert_eq!(pool.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_sample_takes_counters() {
        let (pool, telemetry) = pool_for(good_server().await, 2);
        pool.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let first = pool.sample().await;
        assert_eq!(first.per_session.len(), 2);
        assert_eq!(first.total, first.per_session.iter().sum::<u64>());
        assert!(first.total > 0);

        assert_eq!(telemetry.samples().len(), 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (pool, telemetry) = pool_for(good_server().await, 1);
        pool.start().await.unwrap();

        pool.stop().await;
        pool.stop().await;
        assert_eq!(pool.phase(), PoolPhase::Stopped);
        let stops = telemetry
            .events()
            .into_iter()
            .filter(|e| *e == PoolEvent::Stopped)
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let (pool, _) = pool_for(good_server().await, 2);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        pool.run(shutdown).await.unwrap();
        assert_eq!(pool.phase(), PoolPhase::Stopped);
        assert_eq!(pool.session_count().await, 0);
        assert_eq!(pool.restart_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_retries_until_shutdown() {
        let (pool, telemetry) = pool_for(ServerEndpoint::unresolved(), 1);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(280)).await;
            trigger.cancel();
        });

        let err = pool.restart(&shutdown).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(pool.restart_count(), 1);

        let failed = telemetry
            .events()
            .into_iter()
            .filter(|e| matches!(e, PoolEvent::RestartAttemptFailed { restart: 1, .. }))
            .count();
        assert!(failed >= 3, "expected repeated attempts, got {}", failed);
        assert!(telemetry.errors().iter().all(|r| r.category == "resolution"));
    }

    #[tokio::test]
    async fn test_silent_server_fails_start() {
        for banner in [&b""[..], &b"2.7"[..]] {
            let (pool, _) = silent_pool(silent_server(banner).await);

            let err = tokio::time::timeout(Duration::from_secs(2), pool.start())
                .await
                .expect("start must not block on a silent server")
                .unwrap_err();
            assert!(matches!(err, Error::Timeout { .. }));
            assert_eq!(pool.phase(), PoolPhase::Idle);
            assert_eq!(pool.session_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_restart_keeps_retrying_silent_server() {
        let (pool, telemetry) = silent_pool(silent_server(b"2.7").await);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            trigger.cancel();
        });

        let err = pool.restart(&shutdown).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));

        let failed = telemetry
            .events()
            .into_iter()
            .filter(|e| matches!(e, PoolEvent::RestartAttemptFailed { restart: 1, .. }))
            .count();
        assert!(failed >= 2, "expected repeated attempts, got {}", failed);
        assert!(telemetry.errors().iter().all(|r| r.category == "timeout"));
    }

    #[tokio::test]
    async fn test_zero_sessions_rejected() {
        let (pool, _) = pool_for(good_server().await, 0);

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(pool.phase(), PoolPhase::Fatal);
        assert_eq!(pool.session_count().await, 0);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(PoolPhase::Restarting.to_string(), "restarting");
        assert_eq!(PoolPhase::Fatal.to_string(), "fatal");
    }
}
