//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: after recovery timeout, on the next call
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open, claimed with a compare-and-set on `probe_in_flight`
//! - A probe that is dropped before completing (client went away) releases the
//!   flag without recording anything

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a completed call should affect the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Gateway-side condition that says nothing about backend health.
    Ignored,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// Rejected without running the operation.
    #[error("circuit open for service '{service}'")]
    CircuitOpen { service: String },

    /// The operation ran and returned an error.
    #[error(transparent)]
    Failed(E),
}

/// Read-only view of one breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// One backend's breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
    probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            service: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
        }
    }

    /// Admission check for long-lived sessions. Never changes state and never
    /// claims the probe slot.
    pub fn accepts_new_sessions(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open => self.recovery_elapsed(&inner),
            BreakerState::Closed | BreakerState::HalfOpen => true,
        }
    }

    /// Run `operation` through the breaker; any `Err` counts as a failure.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, |result| match result {
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        })
        .await
    }

    /// Run `operation` through the breaker, letting `classify` decide how the
    /// result affects breaker state.
    pub async fn call_classified<T, E, F, Fut, C>(
        &self,
        operation: F,
        classify: C,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&Result<T, E>) -> Outcome,
    {
        let admission = match self.admit() {
            Some(admission) => admission,
            None => {
                metrics::record_breaker_rejection(&self.name);
                return Err(CallError::CircuitOpen {
                    service: self.name.clone(),
                });
            }
        };

        let guard = CallGuard {
            breaker: self,
            admission,
            completed: false,
        };
        let result = operation().await;
        guard.complete(classify(&result));

        result.map_err(CallError::Failed)
    }

    /// Charge a failure seen after the call itself completed, such as a
    /// response body that broke off mid-stream.
    pub fn record_failure(&self) {
        self.record(Admission::Normal, Outcome::Failure);
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Some(Admission::Normal),
            BreakerState::Open => {
                if !self.recovery_elapsed(&inner) {
                    return None;
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                self.claim_probe()
            }
            BreakerState::HalfOpen => self.claim_probe(),
        }
    }

    fn claim_probe(&self) -> Option<Admission> {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Admission::Probe)
    }

    fn record(&self, admission: Admission, outcome: Outcome) {
        let mut inner = self.lock();
        match (admission, outcome) {
            (_, Outcome::Ignored) => {}
            (Admission::Normal, Outcome::Success) => {
                if inner.state == BreakerState::Closed {
                    inner.failure_count = 0;
                }
            }
            (Admission::Normal, Outcome::Failure) => {
                // Only failures observed while Closed count toward tripping.
                if inner.state == BreakerState::Closed {
                    inner.failure_count = inner.failure_count.saturating_add(1);
                    if inner.failure_count >= self.failure_threshold {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
            }
            (Admission::Probe, Outcome::Success) => {
                inner.failure_count = 0;
                self.transition(&mut inner, BreakerState::Closed);
            }
            (Admission::Probe, Outcome::Failure) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                self.transition(&mut inner, BreakerState::Open);
            }
        }

        if admission == Admission::Probe {
            self.probe_in_flight.store(false, Ordering::Release);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        if to == BreakerState::Open {
            inner.opened_at = Some(Instant::now());
        }

        match to {
            BreakerState::Open => tracing::warn!(
                service = %self.name,
                from = %from,
                failure_count = inner.failure_count,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(service = %self.name, from = %from, to = %to, "Circuit breaker transition"),
        }
        metrics::record_breaker_transition(&self.name, from, to);
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .map(|opened_at| opened_at.elapsed() >= self.recovery_timeout)
            .unwrap_or(true)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves Inner consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records the outcome of an admitted call, or releases the probe slot if the
/// call is dropped first.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    completed: bool,
}

impl CallGuard<'_> {
    fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        self.breaker.record(self.admission, outcome);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.completed && self.admission == Admission::Probe {
            tracing::debug!(service = %self.breaker.name, "Probe cancelled before completion");
            self.breaker.record(Admission::Probe, Outcome::Ignored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::Notify;

    const RECOVERY: Duration = Duration::from_secs(30);

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..breaker.failure_threshold {
            fail(breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn starts_closed() {
        let breaker = CircuitBreaker::new("user", 5, RECOVERY);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.accepts_new_sessions());
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("user", 3, RECOVERY);

        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test]
    async fn success_while_closed_resets_count() {
        let breaker = CircuitBreaker::new("user", 3, RECOVERY);
        fail(&breaker).await;
        fail(&breaker).await;

        let value = breaker.call(|| async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_without_running_operation() {
        let breaker = CircuitBreaker::new("user", 2, RECOVERY);
        trip(&breaker).await;
        tokio::time::advance(RECOVERY - Duration::from_secs(1)).await;

        let attempts = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(CallError::CircuitOpen { ref service }) if service == "user"));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert!(!breaker.accepts_new_sessions());
    }

    #[tokio::test]
    async fn late_failures_count_toward_tripping() {
        let breaker = CircuitBreaker::new("user", 2, RECOVERY);
        breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        breaker.record_failure();
        assert_eq!(breaker.failure_count(), 1);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn call_errors_describe_themselves() {
        let open: CallError<std::io::Error> = CallError::CircuitOpen {
            service: "user".into(),
        };
        assert_eq!(open.to_string(), "circuit open for service 'user'");

        let failed: CallError<std::io::Error> =
            CallError::Failed(std::io::Error::other("connection reset"));
        assert_eq!(failed.to_string(), "connection reset");
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_outcomes_never_move_the_breaker() {
        let breaker = CircuitBreaker::new("user", 1, RECOVERY);
        for _ in 0..10 {
            let result = breaker
                .call_classified(|| async { Ok::<u16, &str>(404) }, |_| Outcome::Ignored)
                .await;
            assert_eq!(result.unwrap(), 404);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_exactly_one_probe_after_recovery() {
        let breaker = Arc::new(CircuitBreaker::new("user", 2, RECOVERY));
        trip(&breaker).await;
        tokio::time::advance(RECOVERY).await;

        let release = Arc::new(Notify::new());
        let admitted = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let breaker = breaker.clone();
            let release = release.clone();
            let admitted = admitted.clone();
            tasks.push(tokio::spawn(async move {
                breaker
                    .call(move || async move {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok::<_, &str>(())
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        release.notify_one();
        let mut ok = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => ok += 1,
                Err(CallError::CircuitOpen { .. }) => rejected += 1,
                Err(CallError::Failed(e)) => panic!("unexpected failure: {e}"),
            }
        }
        assert_eq!((ok, rejected), (1, 9));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_fresh_timestamp() {
        let breaker = CircuitBreaker::new("user", 2, RECOVERY);
        trip(&breaker).await;
        tokio::time::advance(RECOVERY).await;

        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // opened_at was refreshed: half the recovery window later it is still open.
        tokio::time::advance(RECOVERY / 2).await;
        let result = breaker.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CallError::CircuitOpen { .. })));

        tokio::time::advance(RECOVERY / 2).await;
        breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_releases_slot() {
        let breaker = Arc::new(CircuitBreaker::new("user", 1, RECOVERY));
        trip(&breaker).await;
        tokio::time::advance(RECOVERY).await;

        let probe = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .call(|| std::future::pending::<Result<(), &str>>())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        probe.abort();
        assert!(probe.await.unwrap_err().is_cancelled());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
