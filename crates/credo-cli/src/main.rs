use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use credo_client::{HtmdCleaner, LlmConfig, OpenAiExtractor, ReqwestFetcher};
use credo_core::models::{AggregateResult, RatingQuery, SourceResult};
use credo_core::traits::{CacheStore, NullStore};
use credo_core::{
    Aggregator, CacheSweeper, CredoConfig, FallbackResolver, KnownEntityResolver, RateLimiter,
    RatingPageFetcher, ResultCache, SearchResolver, TracingSweepReporter,
};
use credo_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "credo", version, about = "Credit rating aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a company's ratings across Fitch, S&P and Moody's
    Query {
        /// Company name as you would search for it
        company: String,

        /// ISO country code, used to disambiguate and in the cache key
        #[arg(short, long)]
        country: Option<String>,

        /// Print the full result as JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Neither read nor write the persisted cache
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// JSON directory of known entities (name -> agency -> URL)
        #[arg(long, env = "CREDO_ENTITIES_FILE")]
        entities: Option<PathBuf>,

        /// Accept fuzzy search matches instead of only close ones
        #[arg(long, default_value_t = false)]
        no_exact: bool,
    },

    /// Maintain the persisted result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete expired entries once
    Cleanup,
    /// Delete every entry
    Clear,
    /// Delete expired entries periodically until interrupted
    Sweep {
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("credo=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CredoConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Query {
            company,
            country,
            json,
            no_cache,
            entities,
            no_exact,
        } => {
            let mut query = RatingQuery::new(company).with_prefer_exact_match(!no_exact);
            if let Some(country) = country {
                query = query.with_country(country);
            }

            let result = if no_cache {
                run_query(&config, NullStore, &query, entities.as_deref()).await?
            } else {
                let db = open_db().await?;
                let result =
                    run_query(&config, db.cache_store(), &query, entities.as_deref()).await?;
                db.close().await;
                result
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render_summary(&result));
            }
        }
        Commands::Cache { action } => {
            let db = open_db().await?;
            let cache = ResultCache::new(db.cache_store(), config.cache_ttl)?;
            match action {
                CacheAction::Cleanup => {
                    let removed = cache.cleanup_expired().await?;
                    println!("Removed {removed} expired entries");
                }
                CacheAction::Clear => {
                    let removed = cache.clear().await?;
                    println!("Removed {removed} entries");
                }
                CacheAction::Sweep { interval_secs } => {
                    let sweeper = CacheSweeper::new(cache, Duration::from_secs(interval_secs))?;
                    let cancel = CancellationToken::new();
                    let on_signal = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            tracing::info!("Received Ctrl-C, stopping sweeper");
                        }
                        on_signal.cancel();
                    });
                    sweeper.run(cancel, &TracingSweepReporter).await;
                }
            }
            db.close().await;
        }
    }

    Ok(())
}

async fn open_db() -> Result<Database> {
    let db_config = DatabaseConfig::from_env()?;
    let db = Database::connect(&db_config)
        .await
        .with_context(|| format!("Failed to open cache database {}", db_config.url))?;
    db.migrate().await?;
    Ok(db)
}

async fn run_query<S: CacheStore>(
    config: &CredoConfig,
    store: S,
    query: &RatingQuery,
    entities: Option<&Path>,
) -> Result<AggregateResult> {
    let llm = LlmConfig::from_env()?;
    let extractor = OpenAiExtractor::new(&llm)?;
    let fetcher = ReqwestFetcher::new().context("Failed to create HTTP client")?;
    let cleaner = HtmdCleaner::new();

    let known = match entities {
        Some(path) => KnownEntityResolver::from_path(path)?,
        None => KnownEntityResolver::from_map(HashMap::new()),
    };
    tracing::debug!(entities = known.len(), "Loaded known entities");

    let limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone())?);
    let resolver = FallbackResolver::new(
        known,
        SearchResolver::new(fetcher.clone(), cleaner.clone(), extractor.clone())
            .with_limiter(limiter.clone()),
    );
    let page_fetcher = RatingPageFetcher::new(fetcher, cleaner, extractor)?;
    let cache = ResultCache::new(store, config.cache_ttl)?;

    let aggregator = Aggregator::new(
        resolver,
        page_fetcher,
        cache,
        limiter,
        config.aggregator_config(),
    )?;

    let removed = aggregator.cleanup_expired().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Startup cache cleanup failed");
        0
    });
    if removed > 0 {
        tracing::info!(removed, "Removed expired cache entries");
    }

    let result = aggregator.query(query).await?;

    for status in aggregator.limiter().all_status() {
        tracing::debug!(
            origin = %status.origin,
            tokens = status.tokens_remaining,
            circuit = %status.circuit_state,
            failures = status.failure_count,
            "Origin status"
        );
    }

    Ok(result)
}

fn render_summary(result: &AggregateResult) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", result.query);
    if let Some(country) = &result.country {
        let _ = write!(out, " ({country})");
    }
    if result.served_from_cache {
        out.push_str(" [cached]");
    }
    out.push('\n');

    if let Some(resolved) = &result.resolved {
        let _ = writeln!(
            out,
            "Matched: {} (confidence {:.2})",
            resolved.display_name, resolved.confidence
        );
    }
    out.push('\n');

    for (agency, source) in &result.by_source {
        let line = match source {
            SourceResult::Rated(rating) => {
                let mut line = rating.raw.clone();
                if let Some(outlook) = rating.outlook {
                    let _ = write!(line, ", outlook {outlook}");
                }
                if let Some(n) = &rating.normalized {
                    let _ = write!(line, " [score {}/21, {}]", n.score, n.bucket);
                }
                if let Some(date) = rating.last_updated {
                    let _ = write!(line, " as of {date}");
                }
                line
            }
            SourceResult::Blocked { reason } => format!("blocked ({reason})"),
            SourceResult::Failed { reason } => format!("failed ({reason})"),
            SourceResult::NotFound => "not found".to_string(),
        };
        let _ = writeln!(out, "  {:<8} {line}", agency.to_string());
    }

    if !result.notes.is_empty() {
        out.push('\n');
        for note in &result.notes {
            let _ = writeln!(out, "- {note}");
        }
    }
    out
}
