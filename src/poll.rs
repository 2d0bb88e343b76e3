//! Bounded polling for asynchronous cluster state
//!
//! One primitive serves every "wait until X" check: a predicate is probed
//! until it reports [`Probe::Ready`], returns a non-transient error, the
//! deadline passes, or the cancellation token fires.
//!
//! # Example
//!
//! ```ignore
//! use meshline::poll::{poll, Probe};
//! use std::time::Duration;
//!
//! let job = poll("job/tcp-echo")
//!     .timeout(Duration::from_secs(120))
//!     .interval(Duration::from_secs(2))
//!     .until(|| async {
//!         let job = client.get_job(&ns, "tcp-echo").await?;
//!         if job_state(&job).is_terminal() {
//!             Ok(Probe::Ready(job))
//!         } else {
//!             Ok(Probe::Pending(job.state_description()))
//!         }
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wait::WaitError;

/// Default deadline when none is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default delay between probes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The condition holds; polling stops with this value
    Ready(T),
    /// Not there yet; the string describes the observed state
    Pending(String),
}

/// Errors that only mean "not ready yet"
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Why polling stopped without a ready value
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("{0}")]
    Timeout(WaitError),

    #[error("{0}")]
    Failed(E),

    #[error("wait for {resource} cancelled after {elapsed:?}")]
    Cancelled { resource: String, elapsed: Duration },
}

/// Builder for a bounded wait
#[derive(Debug, Clone)]
pub struct Poller {
    resource: String,
    timeout: Duration,
    deadline: Option<Instant>,
    interval: Duration,
    cancel: Option<CancellationToken>,
}

/// Start a wait on `resource` (used only in diagnostics)
///
/// Default timeout: 60 seconds
/// Default interval: 1 second
pub fn poll(resource: impl Into<String>) -> Poller {
    Poller {
        resource: resource.into(),
        timeout: DEFAULT_TIMEOUT,
        deadline: None,
        interval: DEFAULT_INTERVAL,
        cancel: None,
    }
}

impl Poller {
    /// Give up `timeout` after the first probe
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.deadline = None;
        self
    }

    /// Give up at an absolute instant, e.g. one shared by several waits
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the delay between probes
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Abort promptly when `token` is cancelled
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Probe until ready, failed, timed out or cancelled
    ///
    /// The predicate runs once before any sleep, so an already-ready
    /// resource returns without delay. Transient errors are recorded and
    /// retried; any other error is returned immediately as
    /// [`PollError::Failed`].
    pub async fn until<F, Fut, T, E>(self, mut predicate: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, E>>,
        E: Transient + fmt::Display,
    {
        let start = Instant::now();
        let deadline = self.deadline.unwrap_or(start + self.timeout);
        let timeout = deadline.saturating_duration_since(start);
        let cancel = self.cancel.unwrap_or_default();

        let mut attempts = 0u32;
        let mut last_state = "not observed".to_string();
        let mut last_error: Option<String> = None;

        debug!(resource = %self.resource, timeout = ?timeout, interval = ?self.interval, "Starting wait");

        let timed_out = |attempts: u32, last_state: &str, last_error: &Option<String>| {
            PollError::Timeout(
                WaitError::new(self.resource.clone(), timeout, start.elapsed())
                    .with_state(last_state)
                    .with_last_error(last_error.clone())
                    .with_attempts(attempts),
            )
        };
        let cancelled = || PollError::Cancelled {
            resource: self.resource.clone(),
            elapsed: start.elapsed(),
        };

        loop {
            attempts += 1;

            // A check still in flight at the deadline counts as timed out
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled()),
                outcome = predicate() => outcome,
                () = sleep_until(deadline) => {
                    debug!(resource = %self.resource, "Deadline passed during check");
                    return Err(timed_out(attempts, &last_state, &last_error));
                }
            };

            match outcome {
                Ok(Probe::Ready(value)) => {
                    debug!(
                        resource = %self.resource,
                        attempts = attempts,
                        elapsed = ?start.elapsed(),
                        "Condition met"
                    );
                    return Ok(value);
                }
                Ok(Probe::Pending(state)) => {
                    debug!(resource = %self.resource, state = %state, "Not ready yet, waiting...");
                    last_state = state;
                }
                Err(err) if err.is_transient() => {
                    debug!(resource = %self.resource, error = %err, "Transient error, waiting...");
                    last_error = Some(err.to_string());
                }
                Err(err) => return Err(PollError::Failed(err)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out(attempts, &last_state, &last_error));
            }

            let nap = self.interval.min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled()),
                () = sleep(nap) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Missing,
        Broken,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Missing => f.write_str("resource missing"),
                TestError::Broken => f.write_str("resource broken"),
            }
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Missing)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_check_returns_immediately() {
        let start = Instant::now();
        let result: Result<u32, PollError<TestError>> = poll("thing")
            .timeout(Duration::from_secs(10))
            .interval(Duration::from_secs(1))
            .until(|| async { Ok(Probe::Ready(7)) })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<&str, PollError<TestError>> = poll("thing")
            .timeout(Duration::from_secs(10))
            .interval(Duration::from_millis(100))
            .until(move || {
                let c = counter_clone.clone();
                async move {
                    match c.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(TestError::Missing),
                        1 | 2 => Ok(Probe::Pending("warming up".to_string())),
                        _ => Ok(Probe::Ready("done")),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_preserves_last_state_and_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), PollError<TestError>> = poll("job/never")
            .timeout(Duration::from_secs(3))
            .interval(Duration::from_secs(1))
            .until(move || {
                let c = counter_clone.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Missing)
                    } else {
                        Ok(Probe::Pending("Running".to_string()))
                    }
                }
            })
            .await;

        match result {
            Err(PollError::Timeout(err)) => {
                assert_eq!(err.resource, "job/never");
                assert_eq!(err.last_state, "Running");
                assert_eq!(err.last_error.as_deref(), Some("resource missing"));
                assert_eq!(err.timeout, Duration::from_secs(3));
                assert_eq!(err.attempts, 4);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_fails_fast() {
        let start = Instant::now();
        let result: Result<(), PollError<TestError>> = poll("thing")
            .timeout(Duration::from_secs(60))
            .until(|| async { Err(TestError::Broken) })
            .await;

        assert!(matches!(result, Err(PollError::Failed(TestError::Broken))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline_in_the_past_still_checks_once() {
        let deadline = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;

        let result: Result<u8, PollError<TestError>> = poll("late")
            .deadline(deadline)
            .until(|| async { Ok(Probe::Ready(1)) })
            .await;
        assert_eq!(result.unwrap(), 1);

        let result: Result<u8, PollError<TestError>> = poll("late")
            .deadline(deadline)
            .until(|| async { Ok(Probe::Pending("no".to_string())) })
            .await;
        match result {
            Err(PollError::Timeout(err)) => assert_eq!(err.attempts, 1),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_wait() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<(), PollError<TestError>> = poll("service/slow")
            .timeout(Duration::from_secs(600))
            .interval(Duration::from_secs(1))
            .cancel_on(token)
            .until(|| async { Ok(Probe::Pending("waiting".to_string())) })
            .await;

        assert!(matches!(result, Err(PollError::Cancelled { .. })));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_in_flight_check() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result: Result<(), PollError<TestError>> = poll("hung")
            .cancel_on(token)
            .until(|| async {
                sleep(Duration::from_secs(3600)).await;
                Ok(Probe::Ready(()))
            })
            .await;

        assert!(matches!(result, Err(PollError::Cancelled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_check_times_out_at_deadline() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let start = Instant::now();
        let result: Result<(), PollError<TestError>> = poll("endpoints/stuck")
            .timeout(Duration::from_secs(5))
            .interval(Duration::from_secs(1))
            .until(move || {
                let c = counter_clone.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(Probe::Pending("0 ready endpoints".to_string()))
                    } else {
                        sleep(Duration::from_secs(3600)).await;
                        Ok(Probe::Ready(()))
                    }
                }
            })
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        match result {
            Err(PollError::Timeout(err)) => {
                assert_eq!(err.last_state, "0 ready endpoints");
                assert_eq!(err.attempts, 2);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_poll_defaults() {
        let p = poll("x");
        assert_eq!(p.timeout, Duration::from_secs(60));
        assert_eq!(p.interval, Duration::from_secs(1));
        assert!(p.deadline.is_none());
    }
}
