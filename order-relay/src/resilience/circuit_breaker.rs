//! Circuit breaker around broker connection attempts.
//!
//! # States
//! - Closed: reconnects are attempted normally
//! - Open: broker assumed down, requests fail fast without connecting
//! - Half-Open: cooldown elapsed, a single trial may connect
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failed cycles >= failure_threshold
//! Open → Half-Open: cooldown elapsed (on the next request)
//! Half-Open → Closed: trial connects
//! Half-Open → Open: trial fails
//! ```
//!
//! Callers hold an [`Attempt`] for the duration of a connect cycle. An attempt
//! dropped without an outcome (its future was cancelled) hands the trial back
//! so the next caller can try.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Start a connection attempt, or `None` while the breaker rejects them.
    pub fn try_attempt(&self) -> Option<Attempt<'_>> {
        self.allow_attempt().then(|| Attempt {
            breaker: self,
            settled: false,
        })
    }

    /// Whether a connection attempt may proceed right now.
    ///
    /// Moves Open to Half-Open once the cooldown has elapsed and hands the
    /// trial to exactly one caller.
    fn allow_attempt(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    info!("broker_breaker_half_open");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            info!("broker_breaker_closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let trip = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.failure_threshold,
            BreakerState::Open => false,
        };

        if trip {
            warn!(
                consecutive_failures = inner.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "broker_breaker_open"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Give back an unfinished trial without counting it as a failure.
    fn abandon(&self) {
        let mut inner = self.lock();
        if inner.trial_in_flight {
            warn!("broker_breaker_trial_abandoned");
            inner.trial_in_flight = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // State stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An in-progress connect cycle admitted by the breaker.
#[must_use = "an attempt must be resolved with `succeeded` or `failed`"]
pub struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Attempt<'_> {
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon();
        }
    }
}
