pub mod aggregator;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod models;
pub mod names;
pub mod pipeline;
pub mod rate_limiter;
pub mod rating;
pub mod resolver;
pub mod retry;
pub mod sweeper;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregator::{Aggregator, AggregatorConfig};
pub use cache::{CacheEntry, DEFAULT_TTL, Fingerprint, MAX_TTL, MemoryCacheStore, ResultCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::CredoConfig;
pub use error::AppError;
pub use models::{
    AggregateResult, Agency, AgencyRating, RatingQuery, ResolvedCandidate, SourceResult,
    compute_hash,
};
pub use pipeline::RatingPageFetcher;
pub use rate_limiter::{Admission, DenyReason, OriginStatus, RateLimiter, RateLimiterConfig};
pub use rating::{NormalizedRating, Outlook, RatingBucket, RatingScale};
pub use resolver::{FallbackResolver, KnownEntityResolver, SearchResolver};
pub use retry::RetryPolicy;
pub use sweeper::{CacheSweeper, SweepEvent, SweepReporter, TracingSweepReporter};
pub use traits::{CacheStore, Cleaner, Extractor, Fetcher, NullStore, SourceFetcher, SourceResolver};
