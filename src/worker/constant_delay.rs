//! Constant delay work function for deterministic testing
//!
//! Completes one unit of work every `delay` regardless of the job, which
//! gives a predictable throughput when exercising the pool against a test
//! server.

use super::WorkFunction;
use crate::{Error, Job, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Longest single sleep between cancellation checks
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Work function that sleeps and answers `0`
#[derive(Debug, Clone)]
pub struct ConstantDelayWork {
    delay: Duration,
}

impl ConstantDelayWork {
    /// Create a work function with the given per-job delay
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Configured delay
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl WorkFunction for ConstantDelayWork {
    fn name(&self) -> &'static str {
        "constant-delay"
    }

    fn solve(&self, job: &Job, cancel: &CancellationToken) -> Result<String> {
        trace!(job = %job, delay = ?self.delay, "Constant delay work");
        let deadline = Instant::now() + self.delay;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("constant delay work"));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok("0".to_string());
            }
            std::thread::sleep(remaining.min(CANCEL_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_delay_answer() {
        let work = ConstantDelayWork::new(Duration::from_millis(20));
        let start = Instant::now();

        let answer = work.solve(&Job::new("anything"), &CancellationToken::new());
        assert_eq!(answer.unwrap(), "0");
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(work.delay(), Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_cuts_delay_short() {
        let work = ConstantDelayWork::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });

        let start = Instant::now();
        let err = work.solve(&Job::new("anything"), &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
