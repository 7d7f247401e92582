//! Store round trips with timeout, retry and bounded concurrency.
//!
//! [`Backoff`] computes the delay before each retry (fixed or exponential,
//! capped, optionally jittered). [`StoreFetcher`] wraps a [`StoreClient`]
//! and runs every round trip through the same loop:
//!
//! 1. acquire a fetch permit (bounds concurrent store queries),
//! 2. run the query under `tokio::time::timeout`,
//! 3. on a transient failure release the permit, sleep, try again,
//! 4. when the budget is spent, surface `SourceUnavailable`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{BackoffKind, RetryConfig};
use crate::error::{ConnectorError, Result};
use crate::store::{QueryRequest, StoreClient, StoreError};
use crate::value::Row;

/// Retry delay schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    current_delay: Duration,
}

impl Backoff {
    /// Creates a schedule starting at the configured initial delay.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            current_delay,
        }
    }

    /// Retries handed out so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the retry budget is spent.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_retries
    }

    /// Resets the schedule after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempt += 1;

        let delay = self.current_delay;

        // Jitter: ±12.5% of the delay, deterministic in the attempt number.
        let delay = if self.config.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range < 1.0 {
                delay
            } else {
                let jitter_offset =
                    (f64::from(self.attempt) * 7.0 % jitter_range) - (jitter_range / 2.0);
                let jittered_ms = (delay.as_millis() as f64 + jitter_offset).max(1.0);
                Duration::from_millis(jittered_ms as u64)
            }
        } else {
            delay
        };

        if self.config.backoff == BackoffKind::Exponential {
            let next_ms =
                (self.current_delay.as_millis() as f64 * self.config.backoff_multiplier) as u64;
            self.current_delay = Duration::from_millis(next_ms).min(self.config.max_delay);
        }

        Some(delay.min(self.config.max_delay))
    }
}

/// Executes store round trips under the retry policy.
///
/// Generic over the store type because [`StoreClient`] uses RPITIT and is
/// not dyn-compatible.
pub struct StoreFetcher<S> {
    store: Arc<S>,
    retry: RetryConfig,
    timeout: Duration,
    permits: Semaphore,
    max_permits: usize,
    retries: AtomicU64,
}

impl<S: StoreClient> StoreFetcher<S> {
    /// Creates a fetcher allowing `max_concurrent` simultaneous round trips.
    #[must_use]
    pub fn new(store: Arc<S>, retry: RetryConfig, timeout: Duration, max_concurrent: usize) -> Self {
        let max_permits = max_concurrent.max(1);
        Self {
            store,
            retry,
            timeout,
            permits: Semaphore::new(max_permits),
            max_permits,
            retries: AtomicU64::new(0),
        }
    }

    /// Runs a filtered query.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::SourceUnavailable`] when the store fails
    /// with a non-transient error or the retry budget is spent.
    pub async fn fetch(&self, request: &QueryRequest) -> Result<Vec<Row>> {
        let store = &*self.store;
        self.execute(move || store.query(request)).await
    }

    /// Reads the whole table.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub async fn fetch_all(&self) -> Result<Vec<Row>> {
        let store = &*self.store;
        self.execute(move || store.query_all()).await
    }

    async fn execute<F, Fut>(&self, op: F) -> Result<Vec<Row>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<Row>, StoreError>>,
    {
        let mut backoff = Backoff::new(self.retry.clone());
        loop {
            let outcome = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    ConnectorError::InvalidState("fetch semaphore closed".to_string())
                })?;
                match tokio::time::timeout(self.timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(self.timeout)),
                }
            };

            let err = match outcome {
                Ok(rows) => return Ok(rows),
                Err(err) => err,
            };

            if err.is_transient() {
                if let Some(delay) = backoff.next_delay() {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        source = self.store.source_name(),
                        attempt = backoff.attempt(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let attempts = backoff.attempt() + 1;
            warn!(
                source = self.store.source_name(),
                attempts,
                error = %err,
                "store query failed"
            );
            return Err(ConnectorError::SourceUnavailable {
                attempts,
                reason: err.to_string(),
            });
        }
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Retried attempts since creation.
    #[must_use]
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Round trips currently holding a permit.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.max_permits - self.permits.available_permits()
    }
}

impl<S: StoreClient> std::fmt::Debug for StoreFetcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFetcher")
            .field("source", &self.store.source_name())
            .field("max_retries", &self.retry.max_retries)
            .field("timeout", &self.timeout)
            .field("max_permits", &self.max_permits)
            .finish_non_exhaustive()
    }
}
