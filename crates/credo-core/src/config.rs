use std::collections::BTreeSet;
use std::time::Duration;

use crate::aggregator::AggregatorConfig;
use crate::cache::{DEFAULT_TTL, MAX_TTL};
use crate::error::AppError;
use crate::models::Agency;
use crate::rate_limiter::RateLimiterConfig;

/// Runtime configuration for the aggregation core.
#[derive(Debug, Clone)]
pub struct CredoConfig {
    pub rate_limiter: RateLimiterConfig,
    pub cache_ttl: Duration,
    /// Deadline applied separately to the resolve and fetch phases.
    pub phase_timeout: Duration,
    /// Agencies that stay in every result but are never contacted.
    pub disabled_agencies: BTreeSet<Agency>,
}

impl Default for CredoConfig {
    fn default() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::default(),
            cache_ttl: DEFAULT_TTL,
            phase_timeout: Duration::from_secs(60),
            disabled_agencies: BTreeSet::new(),
        }
    }
}

impl CredoConfig {
    /// Read configuration from environment variables.
    ///
    /// - `CREDO_RATE_LIMIT_REQUESTS` (default 10)
    /// - `CREDO_RATE_LIMIT_WINDOW_SECS` (default 60)
    /// - `CREDO_CIRCUIT_FAILURE_THRESHOLD` (default 5)
    /// - `CREDO_CIRCUIT_COOLDOWN_SECS` (default 300)
    /// - `CREDO_CACHE_TTL_DAYS` (default 7)
    /// - `CREDO_PHASE_TIMEOUT_SECS` (default 60)
    /// - `CREDO_DISABLED_AGENCIES` (comma-separated, default none)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let requests = positive(&lookup, "CREDO_RATE_LIMIT_REQUESTS", 10)?;
        let window_secs = positive(&lookup, "CREDO_RATE_LIMIT_WINDOW_SECS", 60)?;
        let threshold = positive(&lookup, "CREDO_CIRCUIT_FAILURE_THRESHOLD", 5)?;
        let cooldown_secs = positive(&lookup, "CREDO_CIRCUIT_COOLDOWN_SECS", 300)?;
        let ttl_days = positive(&lookup, "CREDO_CACHE_TTL_DAYS", 7)?;
        let cache_ttl = Duration::from_secs(ttl_days * 24 * 60 * 60);
        if cache_ttl > MAX_TTL {
            return Err(AppError::ConfigError(format!(
                "CREDO_CACHE_TTL_DAYS must be at most {}",
                MAX_TTL.as_secs() / 86_400
            )));
        }
        let timeout_secs = positive(&lookup, "CREDO_PHASE_TIMEOUT_SECS", 60)?;

        let disabled_agencies = match lookup("CREDO_DISABLED_AGENCIES") {
            None => BTreeSet::new(),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<Agency>().map_err(|e| {
                        AppError::ConfigError(format!("Invalid CREDO_DISABLED_AGENCIES: {e}"))
                    })
                })
                .collect::<Result<_, _>>()?,
        };

        Ok(Self {
            rate_limiter: RateLimiterConfig::default()
                .with_requests_per_window(requests as u32)
                .with_window(Duration::from_secs(window_secs))
                .with_failure_threshold(threshold as u32)
                .with_cooldown(Duration::from_secs(cooldown_secs)),
            cache_ttl,
            phase_timeout: Duration::from_secs(timeout_secs),
            disabled_agencies,
        })
    }

    pub fn with_disabled_agencies(mut self, agencies: impl IntoIterator<Item = Agency>) -> Self {
        self.disabled_agencies = agencies.into_iter().collect();
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Aggregator settings covering every known agency.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig::new(Agency::ALL.to_vec())
            .with_disabled(self.disabled_agencies.iter().copied())
            .with_phase_timeout(self.phase_timeout)
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64, AppError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let parsed: u64 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    if parsed > u64::from(u32::MAX) {
        return Err(AppError::ConfigError(format!("{key} is too large")));
    }
    Ok(parsed)
}
