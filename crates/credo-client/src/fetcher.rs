use std::time::Duration;

use credo_core::error::AppError;
use credo_core::models::Agency;
use credo_core::traits::Fetcher;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// HTTP fetcher using reqwest.
///
/// Only `http`/`https` URLs are fetched. By default the host must belong to
/// one of the rating agencies; [`allow_any_host`](Self::allow_any_host) lifts
/// that restriction.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    allowed_domains: Option<Vec<String>>,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            allowed_domains: Some(
                Agency::ALL
                    .iter()
                    .map(|a| a.domain().to_string())
                    .collect(),
            ),
        })
    }

    /// Fetch from any public host, not just the agency sites.
    pub fn allow_any_host(mut self) -> Self {
        self.allowed_domains = None;
        self
    }

    fn check_url(&self, url: &str) -> Result<Url, AppError> {
        let parsed =
            Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::HttpError(format!(
                "URL scheme '{}' is not allowed (only http/https)",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

        if let Some(domains) = &self.allowed_domains
            && !domains
                .iter()
                .any(|d| host == d || host.ends_with(&format!(".{d}")))
        {
            return Err(AppError::HttpError(format!(
                "Host {host} is not a rating agency site"
            )));
        }

        Ok(parsed)
    }
}

/// Map a non-success status to the error taxonomy.
///
/// 403 and 429 are the agencies' ways of saying "go away"; they become
/// [`AppError::AccessDenied`] and [`AppError::RateLimitExceeded`].
fn status_error(status: StatusCode, url: &str) -> AppError {
    match status {
        StatusCode::FORBIDDEN => AppError::AccessDenied(format!("HTTP 403 for {url}")),
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimitExceeded,
        s => AppError::HttpError(format!("HTTP {} for {url}", s.as_u16())),
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let parsed = self.check_url(url)?;

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Non-success response");
            return Err(status_error(status, url));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}
