//! Multi-agency query orchestration.
//!
//! A query runs in two phases. Every configured agency is resolved in
//! parallel; once all resolutions have settled (or the phase deadline has
//! passed), every agency with a locator is fetched in parallel behind the
//! [`RateLimiter`]. Per-agency failures end up in
//! [`AggregateResult::by_source`] and never fail the query.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::cache::{Fingerprint, ResultCache};
use crate::error::AppError;
use crate::models::{Agency, AggregateResult, RatingQuery, ResolvedCandidate, SourceResult};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::traits::{CacheStore, SourceFetcher, SourceResolver};

/// Confidence below which the selected entity is flagged for review.
const LOW_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Agencies queried, in tie-break order.
    pub sources: Vec<Agency>,
    /// Subset of `sources` reported as blocked without being contacted.
    pub disabled: BTreeSet<Agency>,
    /// Deadline for each of the resolve and fetch phases.
    pub phase_timeout: Duration,
}

impl AggregatorConfig {
    pub fn new(sources: Vec<Agency>) -> Self {
        Self {
            sources,
            disabled: BTreeSet::new(),
            phase_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_disabled(mut self, disabled: impl IntoIterator<Item = Agency>) -> Self {
        self.disabled = disabled.into_iter().collect();
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.sources.is_empty() {
            return Err(AppError::InvariantViolation(
                "at least one source must be configured".into(),
            ));
        }
        let unique: BTreeSet<Agency> = self.sources.iter().copied().collect();
        if unique.len() != self.sources.len() {
            return Err(AppError::InvariantViolation(
                "sources must not contain duplicates".into(),
            ));
        }
        if self.phase_timeout.is_zero() {
            return Err(AppError::InvariantViolation(
                "phase timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::new(Agency::ALL.to_vec())
    }
}

/// How the resolve phase ended for one agency.
#[derive(Debug)]
enum Resolution {
    Found(ResolvedCandidate),
    Unresolved,
    TimedOut,
}

/// Queries every configured agency and merges the answers.
pub struct Aggregator<R, F, S>
where
    R: SourceResolver,
    F: SourceFetcher,
    S: CacheStore,
{
    resolver: R,
    fetcher: F,
    cache: ResultCache<S>,
    limiter: Arc<RateLimiter>,
    config: AggregatorConfig,
}

impl<R, F, S> Aggregator<R, F, S>
where
    R: SourceResolver,
    F: SourceFetcher,
    S: CacheStore,
{
    pub fn new(
        resolver: R,
        fetcher: F,
        cache: ResultCache<S>,
        limiter: Arc<RateLimiter>,
        config: AggregatorConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            resolver,
            fetcher,
            cache,
            limiter,
            config,
        })
    }

    pub fn cache(&self) -> &ResultCache<S> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn sources(&self) -> &[Agency] {
        &self.config.sources
    }

    /// Remove expired cache rows. Intended for process start and timers.
    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        self.cache.cleanup_expired().await
    }

    /// Run a query across all configured agencies.
    ///
    /// Only an invalid query (one that cannot be fingerprinted) is an error;
    /// everything else is reported per agency and in the notes.
    pub async fn query(&self, query: &RatingQuery) -> Result<AggregateResult, AppError> {
        let fingerprint = Fingerprint::for_query(&query.company_name, query.country.as_deref())?;

        if let Some(cached) = self.cache.get(&fingerprint).await {
            return Ok(cached);
        }

        tracing::info!(
            company = %query.company_name,
            country = query.country.as_deref().unwrap_or("-"),
            "Querying rating agencies"
        );

        let active: Vec<Agency> = self
            .config
            .sources
            .iter()
            .copied()
            .filter(|s| !self.config.disabled.contains(s))
            .collect();

        let resolutions = self.resolve_all(query, &active).await;
        let resolved = best_candidate(&self.config.sources, &resolutions);

        let mut by_source = BTreeMap::new();
        for source in self.config.sources.iter().filter(|s| self.config.disabled.contains(s)) {
            by_source.insert(
                *source,
                SourceResult::blocked(format!("{source} scraping disabled by configuration")),
            );
        }

        let mut targets = Vec::new();
        for source in &active {
            match resolutions.get(source) {
                Some(Resolution::Found(ResolvedCandidate {
                    locator: Some(locator),
                    ..
                })) => targets.push((*source, locator.clone())),
                Some(Resolution::TimedOut) => {
                    by_source.insert(*source, SourceResult::failed("timeout"));
                }
                _ => {
                    by_source.insert(
                        *source,
                        SourceResult::failed(format!("could not resolve entity for {source}")),
                    );
                }
            }
        }
        by_source.extend(self.fetch_all(targets).await);

        let notes = build_notes(&self.config.sources, &by_source, resolved.as_ref());
        let result = AggregateResult {
            query: query.company_name.clone(),
            country: query.country.clone(),
            resolved,
            by_source,
            notes,
            served_from_cache: false,
            timestamp: Utc::now(),
        };

        tracing::info!(
            company = %result.query,
            rated = result.rated_count(),
            sources = result.by_source.len(),
            "Query complete"
        );

        self.cache.set(&fingerprint, &result).await;
        Ok(result)
    }

    async fn resolve_all(
        &self,
        query: &RatingQuery,
        sources: &[Agency],
    ) -> BTreeMap<Agency, Resolution> {
        let deadline = Instant::now() + self.config.phase_timeout;

        let handles: Vec<(Agency, JoinHandle<Result<Option<ResolvedCandidate>, AppError>>)> =
            sources
                .iter()
                .map(|&source| {
                    let resolver = self.resolver.clone();
                    let query = query.clone();
                    let handle =
                        tokio::spawn(async move { resolver.resolve(source, &query).await });
                    (source, handle)
                })
                .collect();

        let mut resolutions = BTreeMap::new();
        for (source, mut handle) in handles {
            let resolution = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(Some(candidate)))) => {
                    tracing::debug!(
                        agency = %source,
                        entity = %candidate.display_name,
                        confidence = candidate.confidence,
                        "Resolved entity"
                    );
                    Resolution::Found(candidate)
                }
                Ok(Ok(Ok(None))) => {
                    tracing::info!(agency = %source, "No matching entity");
                    Resolution::Unresolved
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(agency = %source, error = %e, "Resolution failed");
                    Resolution::Unresolved
                }
                Ok(Err(e)) => {
                    tracing::error!(agency = %source, error = %e, "Resolver task failed");
                    Resolution::Unresolved
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(agency = %source, "Resolution timed out");
                    Resolution::TimedOut
                }
            };
            resolutions.insert(source, resolution);
        }
        resolutions
    }

    async fn fetch_all(&self, targets: Vec<(Agency, String)>) -> BTreeMap<Agency, SourceResult> {
        let deadline = Instant::now() + self.config.phase_timeout;

        let handles: Vec<(Agency, String, JoinHandle<SourceResult>)> = targets
            .into_iter()
            .map(|(source, locator)| {
                let origin = self.fetcher.origin(source);
                let fetcher = self.fetcher.clone();
                let limiter = Arc::clone(&self.limiter);
                let task_origin = origin.clone();
                let handle = tokio::spawn(async move {
                    fetch_one(fetcher, limiter, source, task_origin, locator).await
                });
                (source, origin, handle)
            })
            .collect();

        let mut results = BTreeMap::new();
        for (source, origin, mut handle) in handles {
            let result = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::error!(agency = %source, error = %e, "Fetch task failed");
                    SourceResult::failed(format!("fetch task failed: {e}"))
                }
                Err(_) => {
                    handle.abort();
                    self.limiter.record_failure(&origin, "timeout");
                    tracing::warn!(agency = %source, origin = %origin, "Fetch timed out");
                    SourceResult::failed("timeout")
                }
            };
            results.insert(source, result);
        }
        results
    }
}

async fn fetch_one<F: SourceFetcher>(
    fetcher: F,
    limiter: Arc<RateLimiter>,
    source: Agency,
    origin: String,
    locator: String,
) -> SourceResult {
    if let Admission::Denied(reason) = limiter.acquire(&origin) {
        tracing::info!(agency = %source, origin = %origin, reason = %reason, "Fetch not admitted");
        return SourceResult::blocked(reason.to_string());
    }

    match fetcher.fetch(source, &locator).await {
        Ok(result) => {
            match &result {
                SourceResult::Rated(_) | SourceResult::NotFound => limiter.record_success(&origin),
                SourceResult::Blocked { reason } | SourceResult::Failed { reason } => {
                    limiter.record_failure(&origin, reason)
                }
            }
            result
        }
        Err(e) => {
            if e.should_trip_circuit() {
                limiter.record_failure(&origin, &e.to_string());
            }
            tracing::warn!(agency = %source, error = %e, "Fetch failed");
            SourceResult::failed(e.to_string())
        }
    }
}

/// Highest confidence wins; ties go to the earlier source in `order`.
fn best_candidate(
    order: &[Agency],
    resolutions: &BTreeMap<Agency, Resolution>,
) -> Option<ResolvedCandidate> {
    let mut best: Option<&ResolvedCandidate> = None;
    for source in order {
        if let Some(Resolution::Found(candidate)) = resolutions.get(source)
            && best.is_none_or(|b| candidate.confidence > b.confidence)
        {
            best = Some(candidate);
        }
    }
    best.cloned()
}

/// Diagnostic notes, always in the same order: blocked sources, ambiguity,
/// missing ratings, low confidence.
fn build_notes(
    order: &[Agency],
    by_source: &BTreeMap<Agency, SourceResult>,
    resolved: Option<&ResolvedCandidate>,
) -> Vec<String> {
    let mut notes = Vec::new();
    let names_where = |pred: fn(&SourceResult) -> bool| -> Vec<&'static str> {
        order
            .iter()
            .filter(|s| by_source.get(*s).is_some_and(pred))
            .map(|s| s.as_str())
            .collect()
    };

    let blocked = names_where(SourceResult::is_blocked);
    if !blocked.is_empty() {
        notes.push(format!(
            "Scraping blocked for: {}. This may be due to rate limits or access restrictions.",
            blocked.join(", ")
        ));
    }

    if let Some(candidate) = resolved
        && !candidate.alternates.is_empty()
    {
        notes.push(format!(
            "Found {} alternative matches. Confidence in selected entity: {}.",
            candidate.alternates.len(),
            candidate.confidence
        ));
    }

    let missing = names_where(SourceResult::is_miss);
    if !missing.is_empty() {
        notes.push(format!("No rating found for: {}.", missing.join(", ")));
    }

    if let Some(candidate) = resolved
        && candidate.confidence < LOW_CONFIDENCE
    {
        notes.push(format!(
            "Low confidence match ({}). Please verify the entity is correct.",
            candidate.confidence
        ));
    }

    notes
}
