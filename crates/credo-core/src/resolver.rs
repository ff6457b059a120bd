//! Concrete [`SourceResolver`]s: a static entity directory, an agency site
//! search, and a combinator that tries one before the other.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::error::AppError;
use crate::models::{Agency, Alternate, RatingQuery, ResolvedCandidate};
use crate::names::{core_name, similarity};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::retry::RetryPolicy;
use crate::traits::{Cleaner, Extractor, Fetcher, SourceResolver};

/// Alternates kept beside the chosen candidate.
const MAX_ALTERNATES: usize = 5;

/// Minimum similarity for a search hit to be reported as an alternate.
const ALTERNATE_THRESHOLD: f64 = 0.4;

// ---------------------------------------------------------------------------
// KnownEntityResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct KnownEntity {
    name: String,
    core: String,
    pages: HashMap<Agency, String>,
}

/// Resolves well-known issuers from a static directory.
///
/// The directory is a JSON object mapping company name to agency page URLs:
///
/// ```json
/// { "Petrobras": { "fitch": "https://www.fitchratings.com/entity/petrobras-90883336" } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct KnownEntityResolver {
    entities: Arc<Vec<KnownEntity>>,
}

impl KnownEntityResolver {
    pub fn from_map(map: HashMap<String, HashMap<Agency, String>>) -> Self {
        let mut entities: Vec<KnownEntity> = map
            .into_iter()
            .map(|(name, pages)| KnownEntity {
                core: core_name(&name),
                name,
                pages,
            })
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            entities: Arc::new(entities),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let map: HashMap<String, HashMap<Agency, String>> = serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid entity directory: {e}")))?;
        Ok(Self::from_map(map))
    }

    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read entity directory {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn lookup(&self, source: Agency, company_name: &str) -> Option<ResolvedCandidate> {
        let wanted = core_name(company_name);
        if wanted.is_empty() {
            return None;
        }

        let mut best: Option<(&KnownEntity, f64)> = None;
        for entity in self.entities.iter() {
            let confidence = if entity.core == wanted {
                1.0
            } else if entity.core.contains(&wanted) || wanted.contains(&entity.core) {
                0.8
            } else {
                continue;
            };
            if best.is_none_or(|(_, c)| confidence > c) {
                best = Some((entity, confidence));
            }
        }

        let (entity, confidence) = best?;
        let page = entity.pages.get(&source)?;
        Some(ResolvedCandidate::new(entity.name.clone(), page.clone(), confidence))
    }
}

impl SourceResolver for KnownEntityResolver {
    async fn resolve(
        &self,
        source: Agency,
        query: &RatingQuery,
    ) -> Result<Option<ResolvedCandidate>, AppError> {
        let found = self.lookup(source, &query.company_name);
        if let Some(candidate) = &found {
            tracing::debug!(
                agency = %source,
                entity = %candidate.display_name,
                confidence = candidate.confidence,
                "Resolved from entity directory"
            );
        }
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// SearchResolver
// ---------------------------------------------------------------------------

/// JSON schema for the list of issuers found on a search results page.
pub fn search_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "candidates": {
                "type": "array",
                "description": "Issuers or entities listed in the search results, in page order.",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Entity name as shown"},
                        "url": {"type": "string", "description": "Link to the entity's rating page"}
                    },
                    "required": ["name", "url"]
                }
            }
        },
        "required": ["candidates"]
    })
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    candidates: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    name: String,
    url: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Resolves an issuer by running the agency's own site search and asking the
/// extractor to list the entities on the results page.
#[derive(Clone)]
pub struct SearchResolver<F, C, E>
where
    F: Fetcher,
    C: Cleaner,
    E: Extractor,
{
    fetcher: F,
    cleaner: C,
    extractor: E,
    retry: RetryPolicy,
    schema: Arc<serde_json::Value>,
    limiter: Option<Arc<RateLimiter>>,
}

impl<F, C, E> SearchResolver<F, C, E>
where
    F: Fetcher,
    C: Cleaner,
    E: Extractor,
{
    pub fn new(fetcher: F, cleaner: C, extractor: E) -> Self {
        Self {
            fetcher,
            cleaner,
            extractor,
            retry: RetryPolicy::default(),
            schema: Arc::new(search_schema()),
            limiter: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Put search requests behind the same per-origin budget and circuit as
    /// rating page fetches.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn fetch_results(&self, source: Agency, url: &Url) -> Result<String, AppError> {
        let origin = source.domain();
        let Some(limiter) = &self.limiter else {
            return self.retry.run(|| self.fetcher.fetch(url.as_str())).await;
        };

        if let Admission::Denied(reason) = limiter.acquire(origin) {
            tracing::info!(agency = %source, origin, reason = %reason, "Search not admitted");
            return Err(AppError::ResolutionFailed(format!(
                "Search on {source} not admitted: {reason}"
            )));
        }

        let fetched = self.retry.run(|| self.fetcher.fetch(url.as_str())).await;
        match &fetched {
            Ok(_) => limiter.record_success(origin),
            Err(e) if e.should_trip_circuit() => limiter.record_failure(origin, &e.to_string()),
            Err(_) => {}
        }
        fetched
    }

    /// Score and filter raw search hits into a candidate with alternates.
    fn rank(
        &self,
        source: Agency,
        query: &RatingQuery,
        hits: Vec<SearchHit>,
    ) -> Option<ResolvedCandidate> {
        let base = Url::parse(source.base_url()).ok()?;
        let mut scored: Vec<Alternate> = hits
            .into_iter()
            .filter_map(|hit| {
                let url = base.join(hit.url.trim()).ok()?;
                if !source.owns(&url) {
                    tracing::debug!(agency = %source, url = %url, "Ignoring off-site search hit");
                    return None;
                }
                Some(Alternate {
                    confidence: round2(similarity(&query.company_name, &hit.name)),
                    display_name: hit.name.trim().to_string(),
                    locator: url.to_string(),
                })
            })
            .collect();

        if query.prefer_exact_match {
            scored.retain(|a| a.confidence > ALTERNATE_THRESHOLD);
        }
        // Stable sort keeps page order among equal scores.
        scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut ranked = scored.into_iter();
        let best = ranked.next()?;
        let alternates: Vec<Alternate> = ranked
            .filter(|a| a.confidence > ALTERNATE_THRESHOLD)
            .take(MAX_ALTERNATES)
            .collect();

        Some(
            ResolvedCandidate::new(best.display_name, best.locator, best.confidence)
                .with_alternates(alternates),
        )
    }
}

impl<F, C, E> SourceResolver for SearchResolver<F, C, E>
where
    F: Fetcher + 'static,
    C: Cleaner + 'static,
    E: Extractor + 'static,
{
    async fn resolve(
        &self,
        source: Agency,
        query: &RatingQuery,
    ) -> Result<Option<ResolvedCandidate>, AppError> {
        let url = source
            .search_url(query.company_name.trim())
            .map_err(|e| AppError::ResolutionFailed(format!("Bad search URL for {source}: {e}")))?;

        tracing::info!(agency = %source, url = %url, "Searching agency site");
        let html = self.fetch_results(source, &url).await?;
        let markdown = self.cleaner.clean(&html)?;
        let extracted = self.extractor.extract(&markdown, &self.schema).await?;

        let hits: SearchHits = serde_json::from_value(extracted).map_err(|e| {
            AppError::ResolutionFailed(format!("Unreadable search results from {source}: {e}"))
        })?;
        tracing::debug!(agency = %source, hits = hits.candidates.len(), "Search results extracted");

        Ok(self.rank(source, query, hits.candidates))
    }
}

// ---------------------------------------------------------------------------
// FallbackResolver
// ---------------------------------------------------------------------------

/// Tries `primary` first and falls back to `secondary` when it finds nothing
/// or fails.
#[derive(Clone)]
pub struct FallbackResolver<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackResolver<P, S>
where
    P: SourceResolver,
    S: SourceResolver,
{
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P, S> SourceResolver for FallbackResolver<P, S>
where
    P: SourceResolver,
    S: SourceResolver,
{
    async fn resolve(
        &self,
        source: Agency,
        query: &RatingQuery,
    ) -> Result<Option<ResolvedCandidate>, AppError> {
        match self.primary.resolve(source, query).await {
            Ok(Some(candidate)) => return Ok(Some(candidate)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(agency = %source, error = %e, "Primary resolver failed, falling back");
            }
        }
        self.secondary.resolve(source, query).await
    }
}
