//! Telemetry sinks for pool throughput and lifecycle events
//!
//! The pool controller never logs its samples directly; it reports them to a
//! [`Telemetry`] implementation handed to it at construction.

use crate::scheduler::TaskScheduler;
use crate::utils::format_rate;
use crate::worker::compute_rate;
use crate::{Error, Result, ServerEndpoint};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Aggregate work completed by all sessions over one monitor interval
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputSample {
    /// Sum over all sessions
    pub total: u64,
    /// Count per slot, empty slots report zero
    pub per_session: Vec<u64>,
    /// Length of the sampled interval
    pub interval: Duration,
}

impl ThroughputSample {
    /// Units of work per second
    pub fn rate(&self) -> f64 {
        compute_rate(self.total, self.interval)
    }

    /// No session made progress
    pub fn is_stalled(&self) -> bool {
        self.total == 0
    }
}

/// Pool lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// All sessions are up
    Started {
        endpoint: ServerEndpoint,
        sessions: usize,
    },
    /// A sample came back empty
    Stalled,
    /// Sessions torn down, next start attempt after `delay`
    Restarting { restart: u64, delay: Duration },
    /// A restart attempt failed and will be retried
    RestartAttemptFailed { restart: u64, attempt: u64 },
    /// The pool is running again
    Restarted { restart: u64, attempts: u64 },
    /// The pool was stopped
    Stopped,
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::Started { endpoint, sessions } => {
                write!(f, "started {} sessions against {}", sessions, endpoint)
            }
            PoolEvent::Stalled => write!(f, "throughput dropped to zero"),
            PoolEvent::Restarting { restart, delay } => write!(
                f,
                "restart #{}: reconnecting in {}",
                restart,
                humantime::format_duration(*delay)
            ),
            PoolEvent::RestartAttemptFailed { restart, attempt } => {
                write!(f, "restart #{} attempt {} failed", restart, attempt)
            }
            PoolEvent::Restarted { restart, attempts } => {
                write!(f, "restart #{} succeeded after {} attempt(s)", restart, attempts)
            }
            PoolEvent::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owned description of an error, detached from the error value itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub context: String,
    pub category: &'static str,
    pub message: String,
    pub fatal: bool,
}

impl ErrorReport {
    /// Describe `error` raised while doing `context`
    pub fn new(context: impl Into<String>, error: &Error) -> Self {
        Self {
            context: context.into(),
            category: error.category(),
            message: error.to_string(),
            fatal: error.is_fatal(),
        }
    }
}

/// Sink for pool telemetry
pub trait Telemetry: Send + Sync {
    /// Periodic aggregate throughput
    fn throughput(&self, sample: ThroughputSample);

    /// Lifecycle transitions
    fn event(&self, event: PoolEvent);

    /// Errors, recovered or not
    fn error(&self, report: ErrorReport);
}

/// Logs everything through `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn throughput(&self, sample: ThroughputSample) {
        info!(
            total = sample.total,
            sessions = sample.per_session.len(),
            "HASHRATE: {}",
            format_rate(sample.rate())
        );
        debug!(per_session = ?sample.per_session, "Per-session work");
    }

    fn event(&self, event: PoolEvent) {
        match event {
            PoolEvent::Stalled | PoolEvent::RestartAttemptFailed { .. } => warn!("Pool {}", event),
            _ => info!("Pool {}", event),
        }
    }

    fn error(&self, report: ErrorReport) {
        if report.fatal {
            error!(category = report.category, "{}: {}", report.context, report.message);
        } else {
            warn!(category = report.category, "{}: {}", report.context, report.message);
        }
    }
}

/// Forwards every report to an inner sink on a dedicated scheduler thread,
/// so a slow sink never delays the monitor.
pub struct ScheduledTelemetry {
    inner: Arc<dyn Telemetry>,
    scheduler: TaskScheduler,
}

impl ScheduledTelemetry {
    /// Start the dispatch thread for `inner`
    pub fn new(inner: Arc<dyn Telemetry>) -> Result<Self> {
        Ok(Self {
            inner,
            scheduler: TaskScheduler::spawn("Telemetry")?,
        })
    }

    /// Stop the dispatch thread after flushing queued reports
    pub fn shutdown(&self) {
        debug!(pending = self.scheduler.pending(), "Flushing telemetry");
        self.scheduler.stop();
    }

    fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&dyn Telemetry) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = move || f(inner.as_ref());
        if let Err(e) = self.scheduler.submit_fn(task) {
            // Raced with shutdown; the report is dropped
            debug!("Telemetry dispatch unavailable: {}", e);
        }
    }
}

impl Telemetry for ScheduledTelemetry {
    fn throughput(&self, sample: ThroughputSample) {
        if !self.scheduler.is_running() {
            self.inner.throughput(sample);
            return;
        }
        self.dispatch(move |sink| sink.throughput(sample));
    }

    fn event(&self, event: PoolEvent) {
        if !self.scheduler.is_running() {
            self.inner.event(event);
            return;
        }
        self.dispatch(move |sink| sink.event(event));
    }

    fn error(&self, report: ErrorReport) {
        if !self.scheduler.is_running() {
            self.inner.error(report);
            return;
        }
        self.dispatch(move |sink| sink.error(report));
    }
}

/// Keeps every report in memory; useful for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    samples: Mutex<Vec<ThroughputSample>>,
    events: Mutex<Vec<PoolEvent>>,
    errors: Mutex<Vec<ErrorReport>>,
}

impl MemoryTelemetry {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples recorded so far
    pub fn samples(&self) -> Vec<ThroughputSample> {
        self.samples.lock().clone()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Errors recorded so far
    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors.lock().clone()
    }

    /// Number of restarts begun
    pub fn restart_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, PoolEvent::Restarting { .. }))
            .count()
    }
}

impl Telemetry for MemoryTelemetry {
    fn throughput(&self, sample: ThroughputSample) {
        self.samples.lock().push(sample);
    }

    fn event(&self, event: PoolEvent) {
        self.events.lock().push(event);
    }

    fn error(&self, report: ErrorReport) {
        self.errors.lock().push(report);
    }
}
