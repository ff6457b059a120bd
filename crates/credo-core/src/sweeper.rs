use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::error::AppError;
use crate::traits::CacheStore;

/// Events emitted by the sweeper for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SweepEvent<'a> {
    Started { interval: Duration },
    Swept { removed: u64 },
    SweepFailed { error: &'a str },
    Stopped { sweeps: u64, removed_total: u64 },
}

/// Trait for receiving sweeper events (decoupled logging).
pub trait SweepReporter: Send + Sync {
    fn report(&self, event: SweepEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSweepReporter;

impl SweepReporter for TracingSweepReporter {
    fn report(&self, event: SweepEvent<'_>) {
        match event {
            SweepEvent::Started { interval } => {
                tracing::info!(interval_secs = interval.as_secs(), "Cache sweeper started");
            }
            SweepEvent::Swept { removed } => {
                tracing::debug!(%removed, "Cache sweep finished");
            }
            SweepEvent::SweepFailed { error } => {
                tracing::warn!(%error, "Cache sweep failed");
            }
            SweepEvent::Stopped {
                sweeps,
                removed_total,
            } => {
                tracing::info!(%sweeps, %removed_total, "Cache sweeper stopped");
            }
        }
    }
}

/// Periodically deletes expired cache rows until cancelled.
pub struct CacheSweeper<S: CacheStore> {
    cache: ResultCache<S>,
    interval: Duration,
}

impl<S: CacheStore> CacheSweeper<S> {
    pub fn new(cache: ResultCache<S>, interval: Duration) -> Result<Self, AppError> {
        if interval.is_zero() {
            return Err(AppError::InvariantViolation(
                "sweep interval must be greater than zero".into(),
            ));
        }
        Ok(Self { cache, interval })
    }

    /// Sweep immediately, then once per interval, until `cancel_token` fires.
    ///
    /// Failed sweeps are reported and retried on the next tick.
    pub async fn run<SR: SweepReporter>(&self, cancel_token: CancellationToken, reporter: &SR) {
        reporter.report(SweepEvent::Started {
            interval: self.interval,
        });

        let mut sweeps = 0u64;
        let mut removed_total = 0u64;

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            match self.cache.cleanup_expired().await {
                Ok(removed) => {
                    sweeps += 1;
                    removed_total += removed;
                    reporter.report(SweepEvent::Swept { removed });
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(SweepEvent::SweepFailed { error: &error });
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        reporter.report(SweepEvent::Stopped {
            sweeps,
            removed_total,
        });
    }
}
