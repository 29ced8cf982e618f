//! Failure-timeout bookkeeping for a source connection.
//!
//! The timer starts at the first failure after a success and is cleared by
//! the next success. A source whose failures have lasted longer than the
//! timeout is abandoned.

use std::time::Duration;
use tokio::time::Instant;

/// Outcome of recording one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// First failure since the last success; the timer starts now.
    FirstFailure,
    /// Still within the timeout; retry.
    StillFailing { elapsed: Duration },
    /// Failures have lasted longer than the timeout; stop retrying.
    TimedOut { elapsed: Duration },
}

/// Tracks how long a source has been failing.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    timeout: Duration,
    first_failure: Option<Instant>,
}

impl FailureTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            first_failure: None,
        }
    }

    /// Clear the timer after a successful connect.
    pub fn record_success(&mut self) {
        self.first_failure = None;
    }

    /// Record a failure observed at `now`.
    pub fn record_failure(&mut self, now: Instant) -> FailureVerdict {
        match self.first_failure {
            None => {
                self.first_failure = Some(now);
                FailureVerdict::FirstFailure
            }
            Some(first) => {
                let elapsed = now.saturating_duration_since(first);
                if elapsed > self.timeout {
                    FailureVerdict::TimedOut { elapsed }
                } else {
                    FailureVerdict::StillFailing { elapsed }
                }
            }
        }
    }

    pub fn is_failing(&self) -> bool {
        self.first_failure.is_some()
    }

    pub fn first_failure(&self) -> Option<Instant> {
        self.first_failure
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
