use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use url::Url;

use crate::error::AppError;
use crate::models::{Agency, AgencyRating, SourceResult};
use crate::rating::{Outlook, normalize};
use crate::retry::RetryPolicy;
use crate::traits::{Cleaner, Extractor, Fetcher, SourceFetcher};

/// JSON schema the extractor must satisfy when reading a rating page.
pub fn rating_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "rating": {
                "type": ["string", "null"],
                "description": "Long-term issuer credit rating exactly as printed, e.g. AA-, BBB+, Baa2. Null if the page shows none."
            },
            "outlook": {
                "type": ["string", "null"],
                "description": "Rating outlook or watch status, e.g. Stable, Positive, Negative, Developing."
            },
            "last_updated": {
                "type": ["string", "null"],
                "description": "Date of the last rating action in YYYY-MM-DD format."
            }
        },
        "required": ["rating"]
    })
}

#[derive(Debug, Deserialize)]
struct ExtractedRating {
    rating: Option<String>,
    #[serde(default)]
    outlook: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

/// Reads an agency entity page: fetch → clean → extract → validate → normalize.
///
/// Generic over the transport, cleaner and LLM so tests can run it without
/// network access.
#[derive(Clone)]
pub struct RatingPageFetcher<F, C, E>
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
    validator: Arc<jsonschema::Validator>,
}

impl<F, C, E> RatingPageFetcher<F, C, E>
where
    F: Fetcher,
    C: Cleaner,
    E: Extractor,
{
    pub fn new(fetcher: F, cleaner: C, extractor: E) -> Result<Self, AppError> {
        let schema = rating_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| AppError::SchemaValidationError(format!("Invalid rating schema: {e}")))?;
        Ok(Self {
            fetcher,
            cleaner,
            extractor,
            retry: RetryPolicy::default(),
            schema: Arc::new(schema),
            validator: Arc::new(validator),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn validate(&self, extracted: &serde_json::Value) -> Result<(), AppError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(extracted)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::SchemaValidationError(errors.join("; ")))
        }
    }

    async fn read_page(&self, source: Agency, locator: &str) -> Result<SourceResult, AppError> {
        let url = Url::parse(locator)
            .map_err(|e| AppError::FetchFailed(format!("Invalid locator {locator}: {e}")))?;
        if !source.owns(&url) {
            return Err(AppError::FetchFailed(format!(
                "{locator} is not on {}",
                source.domain()
            )));
        }

        tracing::info!(agency = %source, url = %url, "Fetching rating page");
        let html = match self.retry.run(|| self.fetcher.fetch(url.as_str())).await {
            Ok(html) => html,
            Err(e) if e.is_block() => {
                tracing::warn!(agency = %source, error = %e, "Rating page blocked");
                return Ok(SourceResult::blocked(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        self.read_rating(source, &url, &html)
            .await
            .map_err(|e| tooling_failure(source, e))
    }

    async fn read_rating(
        &self,
        source: Agency,
        url: &Url,
        html: &str,
    ) -> Result<SourceResult, AppError> {
        let markdown = self.cleaner.clean(html)?;
        tracing::debug!(
            agency = %source,
            html_bytes = html.len(),
            markdown_bytes = markdown.len(),
            "Cleaned rating page"
        );

        let extracted = self.extractor.extract(&markdown, &self.schema).await?;
        self.validate(&extracted)?;
        let fields: ExtractedRating = serde_json::from_value(extracted)?;

        let Some(raw) = fields
            .rating
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
        else {
            tracing::info!(agency = %source, "No rating on page");
            return Ok(SourceResult::NotFound);
        };

        let normalized = normalize(&raw, source.scale());
        if normalized.is_none() {
            tracing::warn!(agency = %source, raw = %raw, "Rating not on the agency scale");
        }

        let rating = AgencyRating {
            raw,
            outlook: fields.outlook.as_deref().map(Outlook::parse),
            normalized,
            last_updated: fields
                .last_updated
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
            source_url: Some(url.to_string()),
        };
        tracing::info!(agency = %source, rating = %rating.raw, "Extracted rating");
        Ok(SourceResult::Rated(rating))
    }
}

/// Once the page has arrived the agency site has done its part; anything
/// that goes wrong afterwards must not count against its circuit.
fn tooling_failure(source: Agency, e: AppError) -> AppError {
    if !e.should_trip_circuit() {
        return e;
    }
    AppError::LlmError {
        message: format!("reading {source} page failed: {e}"),
        status_code: 0,
        retryable: e.is_retryable(),
    }
}

impl<F, C, E> SourceFetcher for RatingPageFetcher<F, C, E>
where
    F: Fetcher + 'static,
    C: Cleaner + 'static,
    E: Extractor + 'static,
{
    async fn fetch(&self, source: Agency, locator: &str) -> Result<SourceResult, AppError> {
        self.read_page(source, locator).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rating::RatingBucket;
    use crate::testutil::*;

    const FITCH_PAGE: &str = "https://www.fitchratings.com/entity/petrobras-90883336";

    fn page_fetcher(
        fetcher: MockFetcher,
        extractor: MockExtractor,
    ) -> RatingPageFetcher<MockFetcher, MockCleaner, MockExtractor> {
        RatingPageFetcher::new(fetcher, MockCleaner::passthrough(), extractor)
            .unwrap()
            .with_retry(
                RetryPolicy::default()
                    .with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
            )
    }

    #[tokio::test]
    async fn happy_path_returns_normalized_rating() {
        let pf = page_fetcher(
            MockFetcher::new("<html>Petrobras BB Stable</html>"),
            MockExtractor::new(serde_json::json!({
                "rating": "BB",
                "outlook": "Stable",
                "last_updated": "2024-11-05"
            })),
        );

        let result = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap();
        let rating = result.rating().unwrap();

        assert_eq!(rating.raw, "BB");
        assert_eq!(rating.outlook, Some(Outlook::Stable));
        let normalized = rating.normalized.unwrap();
        assert_eq!(normalized.score, 12);
        assert_eq!(normalized.bucket, RatingBucket::Speculative);
        assert_eq!(
            rating.last_updated,
            Some(NaiveDate::from_ymd_opt(2024, 11, 5).unwrap())
        );
        assert_eq!(rating.source_url.as_deref(), Some(FITCH_PAGE));
    }

    #[tokio::test]
    async fn null_rating_is_not_found() {
        let pf = page_fetcher(
            MockFetcher::new("<html>nothing</html>"),
            MockExtractor::new(serde_json::json!({"rating": null})),
        );

        let result = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap();
        assert_eq!(result, SourceResult::NotFound);
    }

    #[tokio::test]
    async fn forbidden_page_is_blocked_not_failed() {
        let fetcher = MockFetcher::with_error(AppError::AccessDenied("HTTP 403".into()));
        let extractor = MockExtractor::new(serde_json::json!({"rating": "AA"}));
        let pf = page_fetcher(fetcher.clone(), extractor.clone());

        let result = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap();

        assert!(result.is_blocked());
        assert_eq!(fetcher.fetched_urls().len(), 1);
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn transient_fetch_errors_are_retried() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(AppError::NetworkError("connection reset".into())),
            Ok("<html>AA-</html>".into()),
        ]);
        let pf = page_fetcher(
            fetcher.clone(),
            MockExtractor::new(serde_json::json!({"rating": "AA-"})),
        );

        let result = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap();

        assert_eq!(result.rating().unwrap().raw, "AA-");
        assert_eq!(fetcher.fetched_urls().len(), 2);
    }

    #[tokio::test]
    async fn schema_violation_is_an_error() {
        let pf = page_fetcher(
            MockFetcher::new("<html></html>"),
            MockExtractor::new(serde_json::json!({"rating": 7})),
        );

        let err = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap_err();
        assert!(matches!(err, AppError::SchemaValidationError(_)));
    }

    #[tokio::test]
    async fn cleaner_failure_surfaces_without_extracting() {
        let extractor = MockExtractor::new(serde_json::json!({"rating": "AA"}));
        let pf = RatingPageFetcher::new(
            MockFetcher::new("<html>AA</html>"),
            MockCleaner::with_error(AppError::CleanerError("unbalanced tags".into())),
            extractor.clone(),
        )
        .unwrap()
        .with_retry(RetryPolicy::none());

        let err = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap_err();

        assert!(matches!(err, AppError::CleanerError(_)));
        assert!(!err.should_trip_circuit());
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn extractor_timeout_is_not_charged_to_the_agency() {
        let pf = page_fetcher(
            MockFetcher::new("<html>AA</html>"),
            MockExtractor::with_error(AppError::Timeout(120)),
        );

        let err = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap_err();

        assert!(matches!(err, AppError::LlmError { retryable: true, .. }));
        assert!(!err.should_trip_circuit());
        assert!(err.to_string().contains("fitch"));
    }

    #[tokio::test]
    async fn extractor_network_error_is_not_charged_to_the_agency() {
        let pf = page_fetcher(
            MockFetcher::new("<html>AA</html>"),
            MockExtractor::with_error(AppError::NetworkError("connection reset".into())),
        );

        let err = pf.fetch(Agency::Fitch, FITCH_PAGE).await.unwrap_err();

        assert!(!err.should_trip_circuit());
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn locator_off_agency_domain_is_rejected() {
        let fetcher = MockFetcher::new("<html></html>");
        let pf = page_fetcher(fetcher.clone(), MockExtractor::new(serde_json::json!({})));

        let err = pf
            .fetch(Agency::Moodys, "https://evil.example.com/moodys.com")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::FetchFailed(_)));
        assert!(fetcher.fetched_urls().is_empty());
    }

    #[tokio::test]
    async fn moodys_rating_uses_moodys_scale() {
        let pf = page_fetcher(
            MockFetcher::new("<html>Ba1</html>"),
            MockExtractor::new(serde_json::json!({
                "rating": "Ba1",
                "outlook": "Positive",
                "last_updated": "not a date"
            })),
        );

        let result = pf
            .fetch(Agency::Moodys, "https://ratings.moodys.com/ratings-and-research/company/00042400")
            .await
            .unwrap();
        let rating = result.rating().unwrap();

        assert_eq!(rating.normalized.unwrap().score, 11);
        assert_eq!(rating.outlook, Some(Outlook::Positive));
        assert!(rating.last_updated.is_none());
    }
}
