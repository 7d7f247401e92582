//! Whole-table lookup cache with periodic background reload.
//!
//! The table is read once at load, indexed by the key columns and
//! published as an `Arc` snapshot. Lookups clone the `Arc` and never
//! touch the store. A background task rebuilds the index every reload
//! period and swaps the pointer; readers see either the old or the new
//! snapshot, never a mix.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::retry::StoreFetcher;
use crate::store::StoreClient;
use crate::value::{LookupKey, Row, RowSet};

type Index = FxHashMap<LookupKey, RowSet>;

/// Groups rows by their key columns.
///
/// # Errors
///
/// Returns [`ConnectorError::Configuration`](crate::ConnectorError::Configuration)
/// if a row lacks a key column.
pub(crate) fn index_rows(key_columns: &Arc<[String]>, rows: Vec<Row>) -> Result<Index> {
    let mut grouped: FxHashMap<LookupKey, Vec<Row>> = FxHashMap::default();
    for row in rows {
        let key = LookupKey::from_row(key_columns, &row)?;
        grouped.entry(key).or_default().push(row);
    }
    Ok(grouped
        .into_iter()
        .map(|(key, rows)| (key, RowSet::from(rows)))
        .collect())
}

struct FullTableInner<S> {
    snapshot: RwLock<Arc<Index>>,
    fetcher: StoreFetcher<S>,
    key_columns: Arc<[String]>,
    metrics: CacheMetrics,
}

impl<S: StoreClient> FullTableInner<S> {
    async fn build(&self) -> Result<Index> {
        let rows = self.fetcher.fetch_all().await?;
        self.metrics.record_store_query();
        index_rows(&self.key_columns, rows)
    }

    /// Builds a new index and publishes it. Dropping the future before it
    /// completes leaves the current snapshot in place.
    async fn reload(&self) -> Result<usize> {
        let index = self.build().await?;
        let keys = index.len();
        *self.snapshot.write() = Arc::new(index);
        Ok(keys)
    }
}

/// In-memory copy of the whole table, keyed by the lookup columns.
pub struct FullTableCache<S> {
    inner: Arc<FullTableInner<S>>,
    cancel: CancellationToken,
    reloader: Mutex<Option<JoinHandle<()>>>,
}

impl<S: StoreClient + 'static> FullTableCache<S> {
    /// Loads the table and starts the reload task when `reload_period`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns the initial load failure; the cache is not created.
    pub async fn load(
        fetcher: StoreFetcher<S>,
        key_columns: Arc<[String]>,
        reload_period: Option<Duration>,
    ) -> Result<Self> {
        let inner = Arc::new(FullTableInner {
            snapshot: RwLock::new(Arc::new(Index::default())),
            fetcher,
            key_columns,
            metrics: CacheMetrics::default(),
        });
        let keys = inner.reload().await?;
        info!(
            source = inner.fetcher.store().source_name(),
            keys,
            "full-table lookup cache loaded"
        );

        let cancel = CancellationToken::new();
        let reloader = reload_period.filter(|p| !p.is_zero()).map(|period| {
            tokio::spawn(Self::run_reloader(
                Arc::clone(&inner),
                period,
                cancel.clone(),
            ))
        });

        Ok(Self {
            inner,
            cancel,
            reloader: Mutex::new(reloader),
        })
    }

    async fn run_reloader(inner: Arc<FullTableInner<S>>, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                result = inner.reload() => match result {
                    Ok(keys) => {
                        inner.metrics.record_reload(true);
                        debug!(keys, "full-table lookup cache reloaded");
                    }
                    Err(e) => {
                        inner.metrics.record_reload(false);
                        warn!(error = %e, "full-table reload failed, keeping previous snapshot");
                    }
                },
            }
        }
        debug!("full-table reload task stopped");
    }

    /// Reloads immediately, outside the periodic schedule.
    ///
    /// # Errors
    ///
    /// Returns the reload failure; the previous snapshot stays published.
    pub async fn reload_now(&self) -> Result<usize> {
        let result = self.inner.reload().await;
        self.inner.metrics.record_reload(result.is_ok());
        result
    }

    /// Rows for `key`; empty when the key is absent. Never queries the store.
    #[must_use]
    pub fn get(&self, key: &LookupKey) -> RowSet {
        let snapshot: Arc<Index> = Arc::clone(&*self.inner.snapshot.read());
        if let Some(rows) = snapshot.get(key) {
            self.inner.metrics.record_hit();
            Arc::clone(rows)
        } else {
            self.inner.metrics.record_miss();
            RowSet::from(Vec::new())
        }
    }

    /// Number of distinct keys in the current snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.snapshot.read().len()
    }

    /// Whether the current snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the background reload task is running.
    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.reloader
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the reload task. A reload in progress is abandoned unpublished.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if self.reloader.lock().take().is_some() {
            debug!("full-table reload task cancelled");
        }
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner
            .metrics
            .snapshot(self.inner.fetcher.retry_count())
    }
}

impl<S> Drop for FullTableCache<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<S: StoreClient> std::fmt::Debug for FullTableCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullTableCache")
            .field("source", &self.inner.fetcher.store().source_name())
            .field("keys", &self.inner.snapshot.read().len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ConnectorError;
    use crate::testing::InMemoryStore;
    use crate::value::ScalarValue;

    fn cols() -> Arc<[String]> {
        vec!["id".to_string()].into()
    }

    fn key(id: i64) -> LookupKey {
        LookupKey::new(cols(), vec![ScalarValue::Int64(id)]).unwrap()
    }

    fn row(id: i64, v: &str) -> Row {
        Row::from_pairs([("id", ScalarValue::Int64(id)), ("v", v.into())])
    }

    fn fetcher(store: &Arc<InMemoryStore>) -> StoreFetcher<InMemoryStore> {
        StoreFetcher::new(
            Arc::clone(store),
            RetryConfig::none(),
            Duration::from_secs(5),
            1,
        )
    }

    #[test]
    fn test_index_groups_duplicates() {
        let index = index_rows(&cols(), vec![row(1, "a"), row(1, "b"), row(2, "c")]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[&key(1)].len(), 2);
    }

    #[test]
    fn test_index_rejects_row_without_key() {
        let rows = vec![Row::from_pairs([("v", ScalarValue::from("x"))])];
        let err = index_rows(&cols(), rows).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_absent_key_is_empty() {
        let store = Arc::new(InMemoryStore::new(vec![row(1, "a")]));
        let cache = FullTableCache::load(fetcher(&store), cols(), None)
            .await
            .unwrap();
        assert_eq!(cache.get(&key(1)).len(), 1);
        assert!(cache.get(&key(9)).is_empty());
        assert_eq!(store.query_all_count(), 1);
        assert_eq!(store.query_count(), 0);
        assert!(!cache.is_reloading());
    }

    #[tokio::test]
    async fn test_initial_load_failure_fails_startup() {
        let store = Arc::new(InMemoryStore::new(vec![row(1, "a")]));
        store.set_fatal(true);
        let result = FullTableCache::load(fetcher(&store), cols(), None).await;
        assert!(matches!(
            result,
            Err(ConnectorError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let store = Arc::new(InMemoryStore::new(vec![row(1, "a")]));
        let cache = FullTableCache::load(fetcher(&store), cols(), None)
            .await
            .unwrap();

        store.set_fatal(true);
        assert!(cache.reload_now().await.is_err());
        assert_eq!(cache.get(&key(1)).len(), 1);
        assert_eq!(cache.metrics().reload_failures, 1);

        store.set_fatal(false);
        store.push(row(2, "b"));
        assert_eq!(cache.reload_now().await.unwrap(), 2);
        assert_eq!(cache.get(&key(2)).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reloads() {
        let store = Arc::new(InMemoryStore::new(vec![row(1, "a")]));
        let cache = FullTableCache::load(fetcher(&store), cols(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(cache.is_reloading());

        cache.shutdown();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(store.query_all_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_reload_keeps_old_snapshot() {
        let store = Arc::new(
            InMemoryStore::new(vec![row(1, "a")]).with_latency(Duration::from_secs(1)),
        );
        let cache = FullTableCache::load(fetcher(&store), cols(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        // Loaded at t=1s; the first reload starts at t=11s and reads at t=12s.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(store.query_all_count(), 2);
        store.set_rows(vec![row(2, "b")]);

        cache.shutdown();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(cache.get(&key(1)).len(), 1);
        assert!(cache.get(&key(2)).is_empty());
        let m = cache.metrics();
        assert_eq!(m.reloads, 0);
        assert_eq!(m.reload_failures, 0);
        assert!(!cache.is_reloading());
    }
}
