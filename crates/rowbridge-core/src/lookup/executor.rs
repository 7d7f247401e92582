//! Per-worker lookup driver.

use std::sync::Arc;

use tracing::info;

use crate::config::LookupConfig;
use crate::error::{ConnectorError, Result};
use crate::lookup::cache::{AnyLookupCache, LookupCache};
use crate::metrics::CacheMetricsSnapshot;
use crate::store::StoreClient;
use crate::value::{LookupKey, Row, RowSet, ScalarValue, TableSchema};

/// Answers point lookups for one worker through its own cache.
pub struct LookupExecutor<C> {
    cache: C,
    key_columns: Arc<[String]>,
}

impl<C: LookupCache> LookupExecutor<C> {
    /// Wraps an already built cache.
    #[must_use]
    pub fn new(cache: C, key_columns: Vec<String>) -> Self {
        Self {
            cache,
            key_columns: key_columns.into(),
        }
    }

    /// Rows whose key columns equal `values`, in key-column order.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] when the number of values
    /// does not match the key columns, or the cache's error on a failed
    /// store fetch.
    pub async fn lookup(&self, values: Vec<ScalarValue>) -> Result<RowSet> {
        let key = LookupKey::new(Arc::clone(&self.key_columns), values)?;
        self.cache.get(&key).await
    }

    /// Rows matching the key columns of `probe`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if `probe` lacks a key
    /// column, otherwise as [`lookup`](Self::lookup).
    pub async fn lookup_row(&self, probe: &Row) -> Result<RowSet> {
        let key = LookupKey::from_row(&self.key_columns, probe)?;
        self.cache.get(&key).await
    }

    /// Configured key columns.
    #[must_use]
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }

    /// Cancels in-flight fetches and background reloads.
    pub fn close(&self) {
        self.cache.close();
    }
}

impl<S: StoreClient + 'static> LookupExecutor<AnyLookupCache<S>> {
    /// Validates `config` against `schema`, probes the store and builds
    /// the configured cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on invalid settings,
    /// [`ConnectorError::TransientStore`] or
    /// [`ConnectorError::SourceUnavailable`] if the store is unhealthy or
    /// the full-table initial load fails.
    pub async fn open(config: &LookupConfig, schema: &TableSchema, store: Arc<S>) -> Result<Self> {
        config.validate(schema)?;
        store.health_check().await.map_err(ConnectorError::from)?;
        let source = store.source_name().to_string();
        let cache = AnyLookupCache::build(config, store).await?;
        info!(
            source = %source,
            strategy = %cache.strategy(),
            keys = ?config.key_columns,
            "lookup executor opened"
        );
        Ok(Self::new(cache, config.key_columns.clone()))
    }

    /// Builds `config.parallelism` independent executors over one store.
    ///
    /// Executors share the store client but nothing else; each has its own
    /// cache and fetch permits.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open); already built executors are closed.
    pub async fn open_workers(
        config: &LookupConfig,
        schema: &TableSchema,
        store: Arc<S>,
    ) -> Result<Vec<Self>> {
        let mut workers = Vec::with_capacity(config.parallelism);
        for _ in 0..config.parallelism {
            match Self::open(config, schema, Arc::clone(&store)).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in &workers {
                        worker.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(workers)
    }
}

impl<C: LookupCache + std::fmt::Debug> std::fmt::Debug for LookupExecutor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupExecutor")
            .field("key_columns", &self.key_columns)
            .field("cache", &self.cache)
            .finish()
    }
}
