//! Circuit breaker guarding a single origin.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED --[failures >= threshold]--> OPEN --[cooldown elapsed]--> HALF_OPEN
//!    ^                                  ^                              |
//!    |                                  +---------[failure]------------+
//!    +------------------------[2 x success]----------------------------+
//! ```
//!
//! Transitions out of `Open` are lazy: they happen when the breaker is next
//! consulted, not on a timer.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are denied until the cooldown elapses.
    Open,
    /// Probing: calls are allowed and the next outcomes decide the state.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures (with no intervening success) before the circuit opens.
    pub failure_threshold: u32,

    /// Successful trial calls in half-open state needed to close the circuit.
    pub success_threshold: u32,

    /// How long an open circuit denies calls before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
}

/// Point-in-time view of a breaker, safe to hand out.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker for one origin.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitBreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_error_message: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Decide whether a call may go out right now.
    ///
    /// Returns `Err(retry_after)` while the circuit is open. An open circuit
    /// whose cooldown has elapsed moves to half-open and lets the call through.
    pub fn check(&self) -> Result<(), Duration> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(self.remaining_cooldown(&inner).unwrap_or(self.config.cooldown)),
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = if inner.state == CircuitState::Open {
            self.remaining_cooldown(&inner)
        } else {
            None
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// A call through this breaker succeeded.
    ///
    /// In `Closed` any success forgives all prior failures; in `HalfOpen`
    /// it counts towards closing the circuit; in `Open` it is ignored.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker closing after {} successful trial calls",
                        inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_error_message = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// A call through this breaker failed.
    ///
    /// The circuit opens whenever the failure count reaches the threshold,
    /// whatever the current state, so a failed half-open trial call reopens it.
    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.lock_inner();

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());
        inner.last_error_message = Some(reason.to_string());

        if inner.failure_count >= self.config.failure_threshold {
            let previous = inner.state;
            inner.state = CircuitState::Open;
            inner.success_count = 0;

            match previous {
                CircuitState::Closed => tracing::warn!(
                    circuit = %self.name,
                    failures = inner.failure_count,
                    error = %reason,
                    "Circuit breaker opening after {} consecutive failures",
                    inner.failure_count
                ),
                CircuitState::HalfOpen => tracing::warn!(
                    circuit = %self.name,
                    error = %reason,
                    "Circuit breaker trial call failed, returning to open state"
                ),
                CircuitState::Open => {}
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        inner.last_error_message = None;
    }

    fn remaining_cooldown(&self, inner: &CircuitBreakerInner) -> Option<Duration> {
        inner
            .last_failure_time
            .map(|t| self.config.cooldown.saturating_sub(t.elapsed()))
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() > self.config.cooldown
        {
            tracing::info!(
                circuit = %self.name,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
    }
}
