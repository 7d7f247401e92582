//! The [`LookupCache`] trait and strategy dispatch.

use std::future::Future;
use std::sync::Arc;

use crate::config::{CacheStrategy, LookupConfig};
use crate::error::Result;
use crate::lookup::full_table::FullTableCache;
use crate::lookup::lru::LruCache;
use crate::metrics::CacheMetricsSnapshot;
use crate::retry::StoreFetcher;
use crate::store::StoreClient;
use crate::value::{LookupKey, RowSet};

/// A cache answering point lookups.
///
/// Each lookup executor owns exactly one cache; caches are never shared
/// between executors.
pub trait LookupCache: Send + Sync {
    /// Rows for `key`. An empty set means the store has no such key.
    fn get(&self, key: &LookupKey) -> impl Future<Output = Result<RowSet>> + Send;

    /// Number of cached keys.
    fn len(&self) -> usize;

    /// Whether nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache counters.
    fn metrics(&self) -> CacheMetricsSnapshot;

    /// Stops background work and aborts pending fetches. Default: no-op.
    fn close(&self) {}
}

impl<S: StoreClient + 'static> LookupCache for LruCache<S> {
    async fn get(&self, key: &LookupKey) -> Result<RowSet> {
        LruCache::get(self, key).await
    }

    fn len(&self) -> usize {
        LruCache::len(self)
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        LruCache::metrics(self)
    }

    fn close(&self) {
        self.cancel_inflight();
    }
}

impl<S: StoreClient + 'static> LookupCache for FullTableCache<S> {
    async fn get(&self, key: &LookupKey) -> Result<RowSet> {
        Ok(FullTableCache::get(self, key))
    }

    fn len(&self) -> usize {
        FullTableCache::len(self)
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        FullTableCache::metrics(self)
    }

    fn close(&self) {
        self.shutdown();
    }
}

/// Either cache strategy, chosen from [`CacheStrategy`] at runtime.
pub enum AnyLookupCache<S> {
    /// Bounded LRU cache.
    Lru(LruCache<S>),
    /// Whole-table cache.
    All(FullTableCache<S>),
}

impl<S: StoreClient + 'static> AnyLookupCache<S> {
    /// Builds the configured cache over `store`. A full-table cache
    /// performs its initial load here.
    ///
    /// # Errors
    ///
    /// Returns the full-table initial load failure.
    pub async fn build(config: &LookupConfig, store: Arc<S>) -> Result<Self> {
        let fetcher = StoreFetcher::new(
            store,
            config.retry.clone(),
            config.timeout,
            config.fetch_permits(),
        );
        match config.cache.strategy {
            CacheStrategy::Lru => Ok(Self::Lru(LruCache::new(
                fetcher,
                config.cache.effective_max_size(),
                config.cache.ttl,
                config.cache.missing_key_policy,
            ))),
            CacheStrategy::All => {
                let key_columns: Arc<[String]> = config.key_columns.clone().into();
                let cache = FullTableCache::load(fetcher, key_columns, config.cache.ttl).await?;
                Ok(Self::All(cache))
            }
        }
    }

    /// The strategy this cache implements.
    #[must_use]
    pub fn strategy(&self) -> CacheStrategy {
        match self {
            Self::Lru(_) => CacheStrategy::Lru,
            Self::All(_) => CacheStrategy::All,
        }
    }
}

impl<S: StoreClient> std::fmt::Debug for AnyLookupCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lru(cache) => std::fmt::Debug::fmt(cache, f),
            Self::All(cache) => std::fmt::Debug::fmt(cache, f),
        }
    }
}

impl<S: StoreClient + 'static> LookupCache for AnyLookupCache<S> {
    async fn get(&self, key: &LookupKey) -> Result<RowSet> {
        match self {
            Self::Lru(cache) => cache.get(key).await,
            Self::All(cache) => Ok(cache.get(key)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Lru(cache) => cache.len(),
            Self::All(cache) => cache.len(),
        }
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        match self {
            Self::Lru(cache) => cache.metrics(),
            Self::All(cache) => cache.metrics(),
        }
    }

    fn close(&self) {
        match self {
            Self::Lru(cache) => cache.cancel_inflight(),
            Self::All(cache) => cache.shutdown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;
    use crate::value::{Row, ScalarValue};

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new(vec![Row::from_pairs([
            ("id", ScalarValue::Int64(1)),
            ("v", "a".into()),
        ])]))
    }

    fn key(id: i64) -> LookupKey {
        let cols: Arc<[String]> = vec!["id".to_string()].into();
        LookupKey::new(cols, vec![ScalarValue::Int64(id)]).unwrap()
    }

    #[tokio::test]
    async fn test_build_lru() {
        let store = store();
        let cache = AnyLookupCache::build(&LookupConfig::new(["id"]), Arc::clone(&store))
            .await
            .unwrap();
        assert_eq!(cache.strategy(), CacheStrategy::Lru);
        assert!(LookupCache::is_empty(&cache));
        assert_eq!(LookupCache::get(&cache, &key(1)).await.unwrap().len(), 1);
        assert_eq!(LookupCache::len(&cache), 1);
        assert_eq!(store.query_all_count(), 0);
    }

    #[tokio::test]
    async fn test_build_all_loads_eagerly() {
        let store = store();
        let mut config = LookupConfig::new(["id"]);
        config.cache.strategy = CacheStrategy::All;
        config.cache.ttl = None;
        let cache = AnyLookupCache::build(&config, Arc::clone(&store))
            .await
            .unwrap();
        assert_eq!(cache.strategy(), CacheStrategy::All);
        assert_eq!(store.query_all_count(), 1);
        assert_eq!(LookupCache::len(&cache), 1);
        assert!(LookupCache::get(&cache, &key(2)).await.unwrap().is_empty());
        assert_eq!(store.query_count(), 0);
        cache.close();
    }
}
