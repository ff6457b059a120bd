use thiserror::Error;

/// Application-wide error types for Credo.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The origin refused access (HTTP 403 or an anti-automation wall).
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// Extracted JSON does not match the expected schema.
    #[error("Schema validation error: {0}")]
    SchemaValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded, either reported by the origin (429) or enforced locally.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A source could not map the query to an entity.
    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    /// A source returned no usable result for a resolved entity.
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// The cache backend is unreachable or misbehaving.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A programming error: broken invariant in query keys or construction.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error means the origin itself misbehaved and
    /// should count against its circuit. Failures of our own tooling (LLM,
    /// cleaner, schema) do not.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::AccessDenied(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("connection")
                    || msg.contains("HTTP 5")
            }
            _ => false,
        }
    }

    /// Returns true if the origin actively refused us (blocked rather than failed).
    pub fn is_block(&self) -> bool {
        matches!(self, AppError::AccessDenied(_) | AppError::RateLimitExceeded)
    }
}
