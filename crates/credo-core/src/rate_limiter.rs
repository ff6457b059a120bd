//! Per-origin admission control.
//!
//! Every origin gets its own token bucket and [`CircuitBreaker`], created
//! lazily on first reference and kept for the life of the process. State for
//! different origins lives behind different locks, so a slow or failing
//! origin never makes callers of another origin wait.
//!
//! [`RateLimiter::acquire`] never sleeps: a denied caller gets a reason back
//! and decides for itself whether to back off or report upward.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Calls allowed per origin within one window.
    pub requests_per_window: u32,
    pub window: Duration,
    pub circuit: CircuitBreakerConfig,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 10,
            window: Duration::from_secs(60),
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_requests_per_window(mut self, requests: u32) -> Self {
        self.requests_per_window = requests;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit.cooldown = cooldown;
        self
    }

    /// Reject configurations that would deny (or open) on every call.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.requests_per_window == 0 {
            return Err(AppError::InvariantViolation(
                "requests_per_window must be greater than zero".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(AppError::InvariantViolation(
                "rate limit window must be greater than zero".into(),
            ));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(AppError::InvariantViolation(
                "circuit failure_threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Why a call was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    CircuitOpen { origin: String, retry_after: Duration },
    RateLimited { origin: String, retry_after: Duration },
}

impl DenyReason {
    pub fn retry_after(&self) -> Duration {
        match self {
            DenyReason::CircuitOpen { retry_after, .. } | DenyReason::RateLimited { retry_after, .. } => {
                *retry_after
            }
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::CircuitOpen { origin, .. } => {
                write!(f, "circuit open for {origin} (too many failures)")
            }
            DenyReason::RateLimited { origin, retry_after } => write!(
                f,
                "rate limit exceeded for {origin}, retry in {:.1}s",
                retry_after.as_secs_f64()
            ),
        }
    }
}

/// Outcome of [`RateLimiter::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(DenyReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    /// Human-readable reason, present only when denied.
    pub fn reason(&self) -> Option<String> {
        match self {
            Admission::Allowed => None,
            Admission::Denied(reason) => Some(reason.to_string()),
        }
    }
}

/// Read-only snapshot of one origin's limiter state.
#[derive(Debug, Clone, Serialize)]
pub struct OriginStatus {
    pub origin: String,
    pub tokens_remaining: u32,
    pub capacity: u32,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    capacity: u32,
    window_start: Instant,
}

impl TokenBucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: capacity,
            capacity,
            window_start: Instant::now(),
        }
    }

    fn refill_if_elapsed(&mut self, window: Duration) {
        if self.window_start.elapsed() >= window {
            self.tokens = self.capacity;
            self.window_start = Instant::now();
        }
    }

    /// Take one token, or report how long until the window resets.
    fn try_take(&mut self, window: Duration) -> Result<(), Duration> {
        self.refill_if_elapsed(window);
        if self.tokens > 0 {
            self.tokens -= 1;
            Ok(())
        } else {
            Err(window.saturating_sub(self.window_start.elapsed()))
        }
    }
}

#[derive(Debug)]
struct OriginGate {
    breaker: CircuitBreaker,
    bucket: Mutex<TokenBucket>,
}

impl OriginGate {
    fn lock_bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(origin = %self.breaker.name(), "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }
}

/// Token-bucket rate limiter with a circuit breaker per origin.
///
/// Construct one per process and share it behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    gates: DashMap<String, Arc<OriginGate>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            config,
            gates: DashMap::new(),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    // The Arc is cloned out so the map shard lock is released before any
    // per-origin lock is taken.
    fn gate(&self, origin: &str) -> Arc<OriginGate> {
        if let Some(gate) = self.gates.get(origin) {
            return Arc::clone(gate.value());
        }
        let gate = self
            .gates
            .entry(origin.to_string())
            .or_insert_with(|| {
                tracing::debug!(origin = %origin, "Tracking new origin");
                Arc::new(OriginGate {
                    breaker: CircuitBreaker::new(origin, self.config.circuit.clone()),
                    bucket: Mutex::new(TokenBucket::full(self.config.requests_per_window)),
                })
            });
        Arc::clone(gate.value())
    }

    /// Ask to make one outbound call to `origin`.
    ///
    /// The circuit is consulted first; only if it admits the call is a
    /// token consumed.
    pub fn acquire(&self, origin: &str) -> Admission {
        let gate = self.gate(origin);

        if let Err(retry_after) = gate.breaker.check() {
            tracing::debug!(origin = %origin, "Denied: circuit open");
            return Admission::Denied(DenyReason::CircuitOpen {
                origin: origin.to_string(),
                retry_after,
            });
        }

        let taken = gate.lock_bucket().try_take(self.config.window);
        match taken {
            Ok(()) => Admission::Allowed,
            Err(retry_after) => {
                tracing::debug!(
                    origin = %origin,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Denied: rate limit exceeded"
                );
                Admission::Denied(DenyReason::RateLimited {
                    origin: origin.to_string(),
                    retry_after,
                })
            }
        }
    }

    pub fn record_success(&self, origin: &str) {
        self.gate(origin).breaker.record_success();
    }

    pub fn record_failure(&self, origin: &str, reason: &str) {
        self.gate(origin).breaker.record_failure(reason);
    }

    pub fn status(&self, origin: &str) -> OriginStatus {
        let gate = self.gate(origin);
        let stats = gate.breaker.stats();
        let tokens_remaining = {
            let mut bucket = gate.lock_bucket();
            bucket.refill_if_elapsed(self.config.window);
            bucket.tokens
        };

        OriginStatus {
            origin: origin.to_string(),
            tokens_remaining,
            capacity: self.config.requests_per_window,
            circuit_state: stats.state,
            failure_count: stats.failure_count,
            last_error: stats.last_error,
        }
    }

    /// Snapshots for every origin seen so far, sorted by origin.
    pub fn all_status(&self) -> Vec<OriginStatus> {
        let mut origins: Vec<String> = self.gates.iter().map(|e| e.key().clone()).collect();
        origins.sort();
        origins.iter().map(|o| self.status(o)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window: Duration, threshold: u32, cooldown: Duration) -> RateLimiter {
        RateLimiter::new(
            RateLimiterConfig::default()
                .with_requests_per_window(requests)
                .with_window(window)
                .with_failure_threshold(threshold)
                .with_cooldown(cooldown),
        )
        .unwrap()
    }

    #[test]
    fn test_third_call_in_window_is_denied() {
        let rl = limiter(2, Duration::from_secs(60), 5, Duration::from_secs(300));

        assert!(rl.acquire("fitchratings.com").is_allowed());
        assert!(rl.acquire("fitchratings.com").is_allowed());

        let third = rl.acquire("fitchratings.com");
        assert!(!third.is_allowed());
        let reason = third.reason().unwrap();
        assert!(reason.contains("rate limit"), "{reason}");
        assert!(reason.contains("fitchratings.com"), "{reason}");
    }

    #[test]
    fn test_origins_are_independent() {
        let rl = limiter(1, Duration::from_secs(60), 5, Duration::from_secs(300));

        assert!(rl.acquire("fitchratings.com").is_allowed());
        assert!(!rl.acquire("fitchratings.com").is_allowed());
        assert!(rl.acquire("moodys.com").is_allowed());
    }

    #[test]
    fn test_tokens_refill_after_window() {
        let rl = limiter(1, Duration::from_millis(20), 5, Duration::from_secs(300));

        assert!(rl.acquire("spglobal.com").is_allowed());
        assert!(!rl.acquire("spglobal.com").is_allowed());

        std::thread::sleep(Duration::from_millis(30));
        assert!(rl.acquire("spglobal.com").is_allowed());
    }

    #[test]
    fn test_never_exceeds_capacity_within_window() {
        let rl = limiter(5, Duration::from_secs(60), 5, Duration::from_secs(300));

        let allowed = (0..20).filter(|_| rl.acquire("moodys.com").is_allowed()).count();
        assert_eq!(allowed, 5);
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let rl = limiter(100, Duration::from_secs(60), 3, Duration::from_secs(300));

        for _ in 0..3 {
            rl.record_failure("moodys.com", "HTTP 503");
        }

        let admission = rl.acquire("moodys.com");
        assert!(!admission.is_allowed());
        assert!(admission.reason().unwrap().contains("circuit"));
        assert!(matches!(
            admission,
            Admission::Denied(DenyReason::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_open_circuit_does_not_consume_tokens() {
        let rl = limiter(2, Duration::from_secs(60), 1, Duration::from_secs(300));

        rl.record_failure("moodys.com", "timeout");
        for _ in 0..5 {
            assert!(!rl.acquire("moodys.com").is_allowed());
        }
        assert_eq!(rl.status("moodys.com").tokens_remaining, 2);
    }

    #[test]
    fn test_circuit_recovers_after_cooldown_and_two_successes() {
        let rl = limiter(100, Duration::from_secs(60), 2, Duration::from_millis(20));

        rl.record_failure("spglobal.com", "HTTP 429");
        rl.record_failure("spglobal.com", "HTTP 429");
        assert!(!rl.acquire("spglobal.com").is_allowed());

        std::thread::sleep(Duration::from_millis(30));

        assert!(rl.acquire("spglobal.com").is_allowed());
        assert_eq!(rl.status("spglobal.com").circuit_state, CircuitState::HalfOpen);

        rl.record_success("spglobal.com");
        rl.record_success("spglobal.com");

        let status = rl.status("spglobal.com");
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[test]
    fn test_status_snapshot() {
        let rl = limiter(3, Duration::from_secs(60), 5, Duration::from_secs(300));

        rl.acquire("fitchratings.com");
        rl.record_failure("fitchratings.com", "HTTP 403");

        let status = rl.status("fitchratings.com");
        assert_eq!(status.origin, "fitchratings.com");
        assert_eq!(status.tokens_remaining, 2);
        assert_eq!(status.capacity, 3);
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("HTTP 403"));

        rl.acquire("moodys.com");
        let all: Vec<String> = rl.all_status().into_iter().map(|s| s.origin).collect();
        assert_eq!(all, vec!["fitchratings.com", "moodys.com"]);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(RateLimiter::new(RateLimiterConfig::default().with_requests_per_window(0)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::default().with_window(Duration::ZERO)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::default().with_failure_threshold(0)).is_err());
    }

    #[test]
    fn test_concurrent_acquire_respects_capacity() {
        let rl = Arc::new(limiter(10, Duration::from_secs(60), 5, Duration::from_secs(300)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| rl.acquire("fitchratings.com").is_allowed())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 10);
    }
}
