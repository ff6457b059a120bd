//! Query-result cache with time-based expiry.
//!
//! [`ResultCache`] keys aggregate results by a [`Fingerprint`] of the query
//! and stores them through a pluggable [`CacheStore`]. The cache never makes
//! a query fail: store errors are logged and degrade to a miss (on read) or
//! a no-op (on write).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{AggregateResult, compute_hash};
use crate::traits::CacheStore;

/// Deterministic cache key for a `(company, country)` pair.
///
/// Both parts are trimmed and lowercased before hashing, so
/// `("Acme Inc", "US")` and `("  acme inc ", "us")` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn for_query(company_name: &str, country: Option<&str>) -> Result<Self, AppError> {
        let name = company_name.trim().to_lowercase();
        if name.is_empty() {
            return Err(AppError::InvariantViolation(
                "cannot fingerprint a query with an empty company name".into(),
            ));
        }
        let country = country.unwrap_or_default().trim().to_lowercase();
        Ok(Self(compute_hash(&format!("{name}:{country}"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub company_name: String,
    pub country: Option<String>,
    /// Serialized [`AggregateResult`].
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Longest accepted TTL: one hundred years.
pub const MAX_TTL: Duration = Duration::from_secs(36_500 * 24 * 60 * 60);

/// TTL cache of aggregate results.
#[derive(Debug, Clone)]
pub struct ResultCache<S> {
    store: S,
    ttl: TimeDelta,
}

impl<S: CacheStore> ResultCache<S> {
    pub fn new(store: S, ttl: Duration) -> Result<Self, AppError> {
        if ttl > MAX_TTL {
            return Err(AppError::InvariantViolation(format!(
                "cache ttl of {}s exceeds the {}s maximum",
                ttl.as_secs(),
                MAX_TTL.as_secs()
            )));
        }
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| AppError::InvariantViolation(format!("cache ttl out of range: {e}")))?;
        if ttl <= TimeDelta::zero() {
            return Err(AppError::InvariantViolation(
                "cache ttl must be greater than zero".into(),
            ));
        }
        Ok(Self { store, ttl })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Look up a cached result. Expired rows are deleted and reported as a miss.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<AggregateResult> {
        let entry = match self.store.load(fingerprint.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(fingerprint = %fingerprint, "Cache miss");
                return None;
            }
            Err(e) => {
                tracing::error!(fingerprint = %fingerprint, error = %e, "Cache read failed");
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            tracing::debug!(fingerprint = %fingerprint, "Cache entry expired");
            if let Err(e) = self.store.remove(fingerprint.as_str()).await {
                tracing::error!(fingerprint = %fingerprint, error = %e, "Failed to delete expired cache entry");
            }
            return None;
        }

        match serde_json::from_str::<AggregateResult>(&entry.payload) {
            Ok(mut result) => {
                tracing::info!(
                    fingerprint = %fingerprint,
                    company = %entry.company_name,
                    "Cache hit"
                );
                result.served_from_cache = true;
                Some(result)
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store `result`, replacing any existing row for the fingerprint.
    pub async fn set(&self, fingerprint: &Fingerprint, result: &AggregateResult) {
        let mut persisted = result.clone();
        persisted.served_from_cache = false;

        let payload = match serde_json::to_string(&persisted) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(fingerprint = %fingerprint, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        let now = Utc::now();
        let Some(expires_at) = now.checked_add_signed(self.ttl) else {
            tracing::error!(fingerprint = %fingerprint, ttl = %self.ttl, "Cache expiry out of range");
            return;
        };
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            company_name: result.query.clone(),
            country: result.country.clone(),
            payload,
            created_at: now,
            expires_at,
        };

        match self.store.upsert(&entry).await {
            Ok(()) => tracing::debug!(fingerprint = %fingerprint, expires_at = %entry.expires_at, "Cached result"),
            Err(e) => tracing::error!(fingerprint = %fingerprint, error = %e, "Cache write failed"),
        }
    }

    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let removed = self.store.remove_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Removed expired cache entries");
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<u64, AppError> {
        let removed = self.store.clear().await?;
        tracing::info!(removed, "Cleared cache");
        Ok(removed)
    }
}

/// In-process [`CacheStore`] backed by `moka`. Contents are lost on exit.
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Cache<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_capacity).build(),
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheStore for MemoryCacheStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        Ok(self.entries.get(key).await)
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), AppError> {
        self.entries
            .insert(entry.fingerprint.clone(), entry.clone())
            .await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.entries.remove(key).await.is_some())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.entries.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<u64, AppError> {
        let keys: Vec<String> = self.entries.iter().map(|(key, _)| key.as_ref().clone()).collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
