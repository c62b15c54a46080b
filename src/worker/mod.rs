//! Work functions and worker sessions
//!
//! A work function turns a job payload into an answer. Sessions treat it as
//! opaque: they fetch a job, run the function on the blocking pool, submit the
//! answer and count one completed unit of work.

use crate::{Job, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod constant_delay;
pub mod hash_search;
pub mod session;

pub use constant_delay::ConstantDelayWork;
pub use hash_search::HashSearch;
pub use session::{SessionContext, SessionState, WorkerSession};

/// Work function trait
///
/// Implementations are CPU-bound and synchronous; sessions call them from
/// the blocking thread pool. Long computations must poll `cancel` and
/// return [`Error::Cancelled`](crate::Error::Cancelled) once it fires, since
/// blocking tasks outlive the session that started them.
pub trait WorkFunction: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Compute the answer for `job`
    fn solve(&self, job: &Job, cancel: &CancellationToken) -> Result<String>;
}

/// Built-in work function kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkKind {
    /// Blake2s nonce search over the job's range
    #[default]
    HashSearch,
    /// Sleep for a fixed time and answer `0`
    ConstantDelay,
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkKind::HashSearch => write!(f, "hash-search"),
            WorkKind::ConstantDelay => write!(f, "constant-delay"),
        }
    }
}

/// Factory for the built-in work functions
pub struct WorkFunctionFactory;

impl WorkFunctionFactory {
    /// Create the work function selected by `kind`
    pub fn create(kind: WorkKind, constant_delay: Duration) -> Arc<dyn WorkFunction> {
        match kind {
            WorkKind::HashSearch => Arc::new(HashSearch::new()),
            WorkKind::ConstantDelay => Arc::new(ConstantDelayWork::new(constant_delay)),
        }
    }
}

/// Units of work per second over `elapsed`
pub fn compute_rate(units: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        units as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_rate() {
        assert_eq!(compute_rate(1000, Duration::from_secs(10)), 100.0);
        assert_eq!(compute_rate(0, Duration::from_secs(10)), 0.0);
        assert_eq!(compute_rate(1000, Duration::from_secs(0)), 0.0);
    }

    #[test]
    fn test_factory_selects_kind() {
        let work = WorkFunctionFactory::create(WorkKind::HashSearch, Duration::ZERO);
        assert_eq!(work.name(), "hash-search");

        let work = WorkFunctionFactory::create(WorkKind::ConstantDelay, Duration::from_millis(1));
        assert_eq!(work.name(), "constant-delay");
    }

    #[test]
    fn test_work_kind_display() {
        assert_eq!(WorkKind::HashSearch.to_string(), "hash-search");
        assert_eq!(WorkKind::ConstantDelay.to_string(), "constant-delay");
    }
}
