use std::future::Future;

use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::error::AppError;
use crate::models::{Agency, RatingQuery, ResolvedCandidate, SourceResult};

/// Fetches raw HTML content from a URL.
///
/// Implementations map HTTP 403 to [`AppError::AccessDenied`] and HTTP 429
/// to [`AppError::RateLimitExceeded`] so callers can tell a block from a fault.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Converts raw HTML into clean Markdown text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

/// Extracts structured JSON data from text content using an LLM.
pub trait Extractor: Send + Sync + Clone {
    /// Sends the content and JSON schema to the LLM and returns extracted JSON.
    fn extract(
        &self,
        content: &str,
        schema: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;
}

/// Maps a query to an entity on one agency.
pub trait SourceResolver: Send + Sync + Clone + 'static {
    /// `Ok(None)` is an ordinary "no such entity"; errors are reserved for
    /// infrastructure failures.
    fn resolve(
        &self,
        source: Agency,
        query: &RatingQuery,
    ) -> impl Future<Output = Result<Option<ResolvedCandidate>, AppError>> + Send;
}

/// Reads one agency's result for a resolved entity.
pub trait SourceFetcher: Send + Sync + Clone + 'static {
    fn fetch(
        &self,
        source: Agency,
        locator: &str,
    ) -> impl Future<Output = Result<SourceResult, AppError>> + Send;

    /// Rate-limiting key for `source`. Must be stable across calls.
    fn origin(&self, source: Agency) -> String {
        source.domain().to_string()
    }
}

/// Key/value storage behind the [`ResultCache`](crate::cache::ResultCache).
pub trait CacheStore: Send + Sync + Clone + 'static {
    fn load(&self, key: &str)
    -> impl Future<Output = Result<Option<CacheEntry>, AppError>> + Send;

    /// Insert or replace the row for `entry.fingerprint`.
    fn upsert(&self, entry: &CacheEntry) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Returns whether a row was removed.
    fn remove(&self, key: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Delete every row with `expires_at < now`. Returns the number removed.
    fn remove_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Delete every row. Returns the number removed.
    fn clear(&self) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// A no-op CacheStore for use when caching is disabled.
#[derive(Debug, Clone)]
pub struct NullStore;

impl CacheStore for NullStore {
    async fn load(&self, _key: &str) -> Result<Option<CacheEntry>, AppError> {
        Ok(None)
    }

    async fn upsert(&self, _entry: &CacheEntry) -> Result<(), AppError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<bool, AppError> {
        Ok(false)
    }

    async fn remove_expired(&self, _now: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(0)
    }

    async fn clear(&self) -> Result<u64, AppError> {
        Ok(0)
    }
}
