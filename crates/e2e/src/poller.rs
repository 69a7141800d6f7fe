//! Condition polling
//!
//! Every wait in the engine is a bounded poll: the probe runs once
//! immediately, then on a fixed cadence until it reports ready, fails
//! fatally, or the deadline passes. A probe that hangs is cut off at the
//! deadline too, so a poll never blocks past its bound.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Instant};
use tracing::trace;

use crate::error::{E2eError, E2eResult};

/// Default cadence between probe evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a probe saw on its last evaluation that was not yet a success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Matches the resolver reported
    pub count: usize,
    /// Human-readable state, e.g. "never matched" or "found but not visible"
    pub detail: String,
}

impl Observation {
    pub fn new(count: usize, detail: impl Into<String>) -> Self {
        Self { count, detail: detail.into() }
    }
}

/// Result of one probe evaluation
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    Pending(Observation),
    Fatal(E2eError),
}

impl<T> Probe<T> {
    /// Fold a query error into a probe result: retryable errors keep the poll
    /// going with the last known observation, the rest end it.
    pub fn from_error(err: E2eError, last: &Observation) -> Self {
        if err.is_retryable() {
            Probe::Pending(Observation::new(last.count, err.to_string()))
        } else {
            Probe::Fatal(err)
        }
    }
}

/// Summary of a poll that ran out of time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOut {
    pub last: Observation,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl TimedOut {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Outcome of a poll that did not fail fatally
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ok(T),
    TimedOut(TimedOut),
}

/// Bound and cadence of a single poll
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            // A zero interval would spin the executor.
            interval: interval.max(Duration::from_millis(1)),
        }
    }
}

/// Evaluate `probe` until it is ready or `policy.timeout` elapses.
///
/// Fatal probe results are returned as `Err`; exhausting the bound is a
/// value (`PollOutcome::TimedOut`) so callers decide how to escalate it.
pub async fn wait_for<T, F, Fut>(policy: PollPolicy, mut probe: F) -> E2eResult<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut attempts = 0u32;
    let mut last = Observation::new(0, "not evaluated");

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());

        // The first evaluation always runs, even with a zero bound.
        let budget = if attempts == 1 { remaining.max(policy.interval) } else { remaining };

        match timeout(budget, probe()).await {
            Ok(Probe::Ready(value)) => {
                trace!(attempts, elapsed_ms = start.elapsed().as_millis() as u64, "condition met");
                return Ok(PollOutcome::Ok(value));
            }
            Ok(Probe::Pending(observation)) => last = observation,
            Ok(Probe::Fatal(err)) => return Err(err),
            Err(_) => {
                let detail = format!("check still running at deadline ({})", last.detail);
                last = Observation::new(last.count, detail);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut(TimedOut {
                last,
                elapsed: now - start,
                attempts,
            }));
        }

        let pause = policy.interval.min(deadline - now);
        sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(timeout_ms: u64, interval_ms: u64) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(timeout_ms), Duration::from_millis(interval_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_evaluation() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = wait_for(policy(0, 100), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Probe::Ready(7)
        })
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let outcome = wait_for(policy(1000, 100), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 3 {
                Probe::Pending(Observation::new(0, "never matched"))
            } else {
                Probe::Ready(n)
            }
        })
        .await
        .unwrap();

        assert!(matches!(outcome, PollOutcome::Ok(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_observation() {
        let start = Instant::now();
        let outcome: PollOutcome<()> = wait_for(policy(500, 100), || async {
            Probe::Pending(Observation::new(2, "found but not visible"))
        })
        .await
        .unwrap();

        match outcome {
            PollOutcome::TimedOut(t) => {
                assert_eq!(t.last.count, 2);
                assert_eq!(t.last.detail, "found but not visible");
                assert!(t.attempts >= 5);
                assert!(t.elapsed >= Duration::from_millis(500));
            }
            PollOutcome::Ok(_) => panic!("expected timeout"),
        }
        // Never waits meaningfully past its bound.
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: E2eResult<PollOutcome<()>> = wait_for(policy(5000, 100), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Probe::Fatal(E2eError::AmbiguousMatch {
                descriptor: "text=\"Shelf\"".into(),
                count: 2,
            })
        })
        .await;

        assert!(matches!(result, Err(E2eError::AmbiguousMatch { count: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_is_cut_off() {
        let outcome: PollOutcome<()> = wait_for(policy(300, 100), || async {
            sleep(Duration::from_secs(3600)).await;
            Probe::Ready(())
        })
        .await
        .unwrap();

        match outcome {
            PollOutcome::TimedOut(t) => assert!(t.last.detail.contains("still running")),
            PollOutcome::Ok(_) => panic!("expected timeout"),
        }
    }

    #[test]
    fn test_retryable_error_becomes_pending() {
        let last = Observation::new(1, "found but not visible");
        let probe: Probe<()> = Probe::from_error(E2eError::Driver("target closed".into()), &last);
        match probe {
            Probe::Pending(o) => assert_eq!(o.count, 1),
            _ => panic!("expected pending"),
        }
    }
}
