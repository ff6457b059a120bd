use std::time::Duration;

use credo_core::error::AppError;
use credo_core::traits::Extractor;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const SYSTEM_PROMPT: &str = "You read pages from credit rating agency websites (Fitch, S&P Global, Moody's). \
Extract only what the page states about the issuer's long-term credit rating, outlook and rating dates, \
or the search results listed on it. Never guess a rating that is not printed on the page; use null instead. \
Respond ONLY with JSON matching the requested schema.";

/// Connection settings for the OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    /// Read `CREDO_API_KEY` (required), `CREDO_MODEL` and `CREDO_BASE_URL`.
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = std::env::var("CREDO_API_KEY")
            .map_err(|_| AppError::ConfigError("CREDO_API_KEY must be set".into()))?;
        if api_key.trim().is_empty() {
            return Err(AppError::ConfigError("CREDO_API_KEY is empty".into()));
        }

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("CREDO_MODEL")
            && !model.trim().is_empty()
        {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("CREDO_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// OpenAI-compatible LLM client for structured extraction.
#[derive(Clone)]
pub struct OpenAiExtractor {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiExtractor {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_secs: config.timeout.as_secs(),
        })
    }

    fn request<'a>(
        &'a self,
        content: &str,
        schema: &'a serde_json::Value,
    ) -> Result<ChatRequest<'a>, AppError> {
        Ok(ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user",
                    content: format!(
                        "JSON schema:\n```json\n{}\n```\n\nPage content:\n\n{}",
                        serde_json::to_string_pretty(schema)?,
                        content
                    ),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaWrapper {
                    name: "rating_extraction",
                    schema,
                },
            },
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaWrapper<'a>,
}

#[derive(Serialize)]
struct JsonSchemaWrapper<'a> {
    name: &'static str,
    schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// LLM throttling stays an `LlmError`: it says nothing about the agency site.
fn api_error(status_code: u16, body: &str) -> AppError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
    AppError::LlmError {
        message,
        status_code,
        retryable: status_code == 429 || status_code >= 500,
    }
}

/// Provider outages are retried but never charged to an agency circuit.
fn transport_error(message: String) -> AppError {
    AppError::LlmError {
        message,
        status_code: 0,
        retryable: true,
    }
}

/// Models sometimes wrap JSON in a Markdown fence despite the response format.
fn parse_content(content: &str) -> Result<serde_json::Value, AppError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| {
        AppError::SchemaValidationError(format!("LLM returned invalid JSON: {e}. Raw: {content}"))
    })
}

impl Extractor for OpenAiExtractor {
    async fn extract(
        &self,
        content: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let request = self.request(content, schema)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    transport_error(format!("LLM timed out after {}s", self.timeout_secs))
                } else if e.is_connect() {
                    transport_error(format!("LLM connection failed: {e}"))
                } else {
                    transport_error(format!("LLM request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error(format!("Failed to read LLM response: {e}")))?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })?;

        tracing::debug!(model = %self.model, chars = text.len(), "LLM extraction returned");
        parse_content(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_schema_and_page() {
        let extractor = OpenAiExtractor::new(&LlmConfig::new("sk-test")).unwrap();
        let schema = serde_json::json!({"type": "object"});
        let request = extractor.request("Rating: AA-", &schema).unwrap();
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["schema"], schema);
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Rating: AA-"));
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let config = LlmConfig::new("k").with_base_url("http://localhost:11434/v1/");
        let extractor = OpenAiExtractor::new(&config).unwrap();
        assert_eq!(extractor.endpoint, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn fenced_json_is_accepted() {
        let value = parse_content("```json\n{\"rating\": \"Baa2\"}\n```").unwrap();
        assert_eq!(value["rating"], "Baa2");
    }

    #[test]
    fn prose_is_a_schema_error() {
        let err = parse_content("The rating is AA").unwrap_err();
        assert!(matches!(err, AppError::SchemaValidationError(_)));
    }

    #[test]
    fn api_errors_are_classified() {
        let throttled = api_error(429, "");
        assert!(throttled.is_retryable());
        assert!(!throttled.should_trip_circuit());

        let err = api_error(503, r#"{"error":{"message":"overloaded"}}"#);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("overloaded"));

        let err = api_error(401, "nope");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("HTTP 401"));
    }

    #[test]
    fn transport_faults_stay_with_the_provider() {
        let err = transport_error("LLM timed out after 120s".into());
        assert!(err.is_retryable());
        assert!(!err.should_trip_circuit());
        assert!(!err.is_block());
    }

    #[tokio::test]
    async fn unreachable_provider_is_an_llm_error() {
        let config = LlmConfig::new("k").with_base_url("http://127.0.0.1:1/v1");
        let extractor = OpenAiExtractor::new(&config).unwrap();
        let err = extractor
            .extract("Rating: AA-", &serde_json::json!({"type": "object"}))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::LlmError { retryable: true, .. }));
        assert!(!err.should_trip_circuit());
    }
}
