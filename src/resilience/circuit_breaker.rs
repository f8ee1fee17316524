// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker guarding the remote tier.
//!
//! Protects callers from a degraded remote store: once enough consecutive
//! failures land inside the rolling window the breaker trips, and every call
//! fails fast without touching the network until the recovery timeout passes.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Service unhealthy, requests fail-fast without attempting
//! - HalfOpen: Recovery timeout elapsed, exactly one trial request allowed
//!
//! Time comes from `tokio::time`, so paused-clock tests drive recovery
//! deterministically.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures (within `failure_window`) that trip the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    pub recovery_timeout: Duration,
    /// Failures older than this no longer count toward the threshold
    pub failure_window: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Time since the most recent failure
    pub since_last_failure: Option<Duration>,
    /// Time left before an open circuit admits a trial call
    pub open_remaining: Option<Duration>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    window_started: Option<Instant>,
    last_failure: Option<Instant>,
    opened_until: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            window_started: None,
            last_failure: None,
            opened_until: None,
            trial_in_flight: false,
        }
    }
}

enum Admission {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the trial future is dropped before
/// it reports an outcome.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            inner.trial_in_flight = false;
            debug!(circuit = %self.breaker.name, "Half-open trial abandoned, slot released");
        }
    }
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerState>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let name = name.into();
        crate::metrics::set_circuit_state(&name, CircuitState::Closed as u8);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState::closed()),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state. An open circuit whose timeout has passed reports
    /// `HalfOpen` even before the trial call arrives.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_until) {
            (CircuitState::Open, Some(until)) if Instant::now() >= until => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            since_last_failure: inner.last_failure.map(|at| now.saturating_duration_since(at)),
            open_remaining: match inner.state {
                CircuitState::Open => inner.opened_until.map(|until| until.saturating_duration_since(now)),
                _ => None,
            },
        }
    }

    /// Force the circuit closed and forget recorded failures.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
        info!(circuit = %self.name, "Circuit breaker manually reset");
    }

    /// Execute an async operation through the circuit breaker
    ///
    /// Takes a closure that returns a Future, so a rejected call never
    /// constructs (let alone polls) the operation.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let admission = match self.admit() {
            Some(admission) => admission,
            None => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_call(&self.name, "rejected");
                return Err(CircuitError::Rejected);
            }
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = f().await;
        let trial = guard.armed;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "success");
                self.on_success(trial);
                Ok(value)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "failure");
                self.on_failure(trial);
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn admit(&self) -> Option<Admission> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => match inner.opened_until {
                Some(until) if now >= until => {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    drop(inner);
                    crate::metrics::set_circuit_state(&self.name, CircuitState::HalfOpen as u8);
                    debug!(circuit = %self.name, "Recovery timeout elapsed, admitting trial call");
                    Some(Admission::Trial)
                }
                _ => None,
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if trial {
            *inner = BreakerState::closed();
            drop(inner);
            crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
            info!(circuit = %self.name, "Trial call succeeded, circuit closed");
        } else if inner.state == CircuitState::Closed {
            inner.failure_count = 0;
            inner.window_started = None;
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.last_failure = Some(now);

        if trial {
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            inner.opened_until = Some(now + self.config.recovery_timeout);
            drop(inner);
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            warn!(
                circuit = %self.name,
                recovery_timeout = ?self.config.recovery_timeout,
                "Trial call failed, circuit re-opened"
            );
            return;
        }

        if inner.state != CircuitState::Closed {
            // Late result from a call admitted before the circuit tripped
            return;
        }

        let window_expired = inner
            .window_started
            .map_or(true, |started| now.saturating_duration_since(started) > self.config.failure_window);
        if window_expired {
            inner.window_started = Some(now);
            inner.failure_count = 0;
        }
        inner.failure_count += 1;

        if inner.failure_count >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_until = Some(now + self.config.recovery_timeout);
            let failures = inner.failure_count;
            drop(inner);
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            warn!(
                circuit = %self.name,
                failures,
                recovery_timeout = ?self.config.recovery_timeout,
                "Failure threshold reached, circuit opened"
            );
        }
    }

    /// Get total number of calls
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of failed calls (operation errors)
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.calls_total();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
