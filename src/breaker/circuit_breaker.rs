//! Circuit breaker for one resource kind.
//!
//! The breaker fails fast when a kind keeps failing. It has three states:
//! - Closed: calls pass through
//! - Open: calls fail immediately until the cooldown elapses
//! - HalfOpen: exactly one trial call is allowed through

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Returned instead of a permit while the breaker rejects calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit open for {kind} (retry in {retry_after:?})")]
pub struct CircuitOpen {
    pub kind: String,
    pub retry_after: Duration,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    /// Bumped on every state transition. Permits carry the generation they
    /// were issued in; outcomes from an older generation are ignored.
    generation: u64,
}

impl Inner {
    fn transition(&mut self, state: BreakerState) {
        self.state = state;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Breaker protecting calls for a single kind.
#[derive(Debug)]
pub struct CircuitBreaker {
    kind: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(kind: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            kind: kind.into(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                last_failure_wall: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    // State is a handful of counters; a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to make one call.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and hands
    /// out the single trial permit; everything else is rejected until that
    /// trial call reports back.
    pub fn acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitOpen> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            BreakerState::Closed => Ok(BreakerPermit::new(self.clone(), inner.generation, false)),
            BreakerState::Open => {
                let reopen_at = inner
                    .last_failure
                    .map(|at| at + self.cooldown)
                    .unwrap_or(now);
                if now >= reopen_at {
                    inner.transition(BreakerState::HalfOpen);
                    inner.trial_in_flight = true;
                    log::info!("Circuit breaker for {} half-open, allowing one call", self.kind);
                    Ok(BreakerPermit::new(self.clone(), inner.generation, true))
                } else {
                    Err(CircuitOpen {
                        kind: self.kind.clone(),
                        retry_after: reopen_at - now,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CircuitOpen {
                        kind: self.kind.clone(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self.clone(), inner.generation, true))
                }
            }
        }
    }

    fn on_success(&self, generation: u64, trial: bool) {
        let mut inner = self.lock();
        if generation != inner.generation {
            log::debug!("Ignoring stale success for {}", self.kind);
            return;
        }
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen if trial => {
                inner.transition(BreakerState::Closed);
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                log::info!("Circuit breaker for {} closed", self.kind);
            }
            _ => {}
        }
    }

    fn on_failure(&self, generation: u64, trial: bool) {
        let mut inner = self.lock();
        if generation != inner.generation {
            log::debug!("Ignoring stale failure for {}", self.kind);
            return;
        }
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure = Some(Instant::now());
                inner.last_failure_wall = Some(Utc::now());
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.transition(BreakerState::Open);
                    log::warn!(
                        "Circuit breaker for {} opened after {} consecutive failures",
                        self.kind,
                        inner.consecutive_failures
                    );
                }
            }
            BreakerState::HalfOpen if trial => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure = Some(Instant::now());
                inner.last_failure_wall = Some(Utc::now());
                inner.transition(BreakerState::Open);
                inner.trial_in_flight = false;
                log::warn!("Circuit breaker for {} half-open call failed, reopening", self.kind);
            }
            _ => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if generation == inner.generation && inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_wall,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Force the breaker back to closed with a clean count.
    ///
    /// Permits issued before the reset no longer affect the breaker.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.transition(BreakerState::Closed);
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.last_failure_wall = None;
        inner.trial_in_flight = false;
    }
}

/// Permission for one call. Report the outcome with [`success`](Self::success)
/// or [`failure`](Self::failure); a permit dropped without an outcome (the call
/// was cancelled) gives the half-open slot back without changing state.
///
/// Outcomes only count while the breaker is still in the state the permit was
/// issued in, and only the half-open permit can move the breaker out of
/// half-open.
#[must_use = "report the call outcome on the permit"]
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Option<Arc<CircuitBreaker>>,
    generation: u64,
    trial: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, generation: u64, trial: bool) -> Self {
        Self {
            breaker: Some(breaker),
            generation,
            trial,
        }
    }

    /// Permit that is not tied to any breaker (breakers disabled).
    pub fn unguarded() -> Self {
        Self {
            breaker: None,
            generation: 0,
            trial: false,
        }
    }

    /// Whether this is the single half-open permit.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.on_success(self.generation, self.trial);
        }
    }

    pub fn failure(mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.on_failure(self.generation, self.trial);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            if self.trial {
                breaker.release_trial(self.generation);
            }
        }
    }
}
