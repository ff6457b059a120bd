//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::error::AppError;
use crate::models::{Agency, RatingQuery, ResolvedCandidate, SourceResult};
use crate::traits::{CacheStore, Cleaner, Extractor, Fetcher, SourceFetcher, SourceResolver};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns a configurable response.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.urls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that returns the input unchanged unless told to fail.
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let mut err = self.error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        Ok(html.to_string())
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that returns configurable JSON.
#[derive(Clone)]
pub struct MockExtractor {
    responses: Arc<Mutex<Vec<Result<serde_json::Value, AppError>>>>,
    contents: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    pub fn new(data: serde_json::Value) -> Self {
        Self::with_responses(vec![Ok(data)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<serde_json::Value, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            contents: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.contents.lock().unwrap().len()
    }
}

impl Extractor for MockExtractor {
    async fn extract(
        &self,
        content: &str,
        _schema: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        self.contents.lock().unwrap().push(content.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(serde_json::json!({}))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockResolver
// ---------------------------------------------------------------------------

/// Mock resolver with a fixed answer per agency.
///
/// Agencies without a configured answer resolve to `Ok(None)`.
#[derive(Clone, Default)]
pub struct MockResolver {
    answers: Arc<Mutex<HashMap<Agency, Result<Option<ResolvedCandidate>, String>>>>,
    delays: Arc<Mutex<HashMap<Agency, Duration>>>,
    calls: Arc<Mutex<Vec<Agency>>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidate(self, source: Agency, candidate: ResolvedCandidate) -> Self {
        self.answers.lock().unwrap().insert(source, Ok(Some(candidate)));
        self
    }

    /// Fails with a [`AppError::NetworkError`] carrying `message`.
    pub fn with_error(self, source: Agency, message: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(source, Err(message.to_string()));
        self
    }

    pub fn with_delay(self, source: Agency, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(source, delay);
        self
    }

    pub fn calls(&self) -> Vec<Agency> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceResolver for MockResolver {
    async fn resolve(
        &self,
        source: Agency,
        _query: &RatingQuery,
    ) -> Result<Option<ResolvedCandidate>, AppError> {
        self.calls.lock().unwrap().push(source);
        let delay = self.delays.lock().unwrap().get(&source).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let answer = self.answers.lock().unwrap().get(&source).cloned();
        match answer {
            Some(Ok(candidate)) => Ok(candidate),
            Some(Err(message)) => Err(AppError::NetworkError(message)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSourceFetcher
// ---------------------------------------------------------------------------

/// Mock source fetcher with a fixed outcome per agency.
///
/// Agencies without a configured outcome return `NotFound`.
#[derive(Clone, Default)]
pub struct MockSourceFetcher {
    outcomes: Arc<Mutex<HashMap<Agency, Result<SourceResult, String>>>>,
    delays: Arc<Mutex<HashMap<Agency, Duration>>>,
    calls: Arc<Mutex<Vec<(Agency, String)>>>,
}

impl MockSourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, source: Agency, result: SourceResult) -> Self {
        self.outcomes.lock().unwrap().insert(source, Ok(result));
        self
    }

    /// Fails with a [`AppError::NetworkError`] carrying `message`.
    pub fn with_error(self, source: Agency, message: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(source, Err(message.to_string()));
        self
    }

    pub fn with_delay(self, source: Agency, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(source, delay);
        self
    }

    /// Recorded `(agency, locator)` pairs in call order.
    pub fn calls(&self) -> Vec<(Agency, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceFetcher for MockSourceFetcher {
    async fn fetch(&self, source: Agency, locator: &str) -> Result<SourceResult, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((source, locator.to_string()));
        let delay = self.delays.lock().unwrap().get(&source).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.outcomes.lock().unwrap().get(&source).cloned();
        match outcome {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(AppError::NetworkError(message)),
            None => Ok(SourceResult::NotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// FailingCacheStore
// ---------------------------------------------------------------------------

/// A cache store whose every operation fails, as if the database were down.
#[derive(Clone)]
pub struct FailingCacheStore;

impl CacheStore for FailingCacheStore {
    async fn load(&self, _key: &str) -> Result<Option<CacheEntry>, AppError> {
        Err(AppError::CacheUnavailable("store offline".into()))
    }

    async fn upsert(&self, _entry: &CacheEntry) -> Result<(), AppError> {
        Err(AppError::CacheUnavailable("store offline".into()))
    }

    async fn remove(&self, _key: &str) -> Result<bool, AppError> {
        Err(AppError::CacheUnavailable("store offline".into()))
    }

    async fn remove_expired(&self, _now: DateTime<Utc>) -> Result<u64, AppError> {
        Err(AppError::CacheUnavailable("store offline".into()))
    }

    async fn clear(&self) -> Result<u64, AppError> {
        Err(AppError::CacheUnavailable("store offline".into()))
    }
}
