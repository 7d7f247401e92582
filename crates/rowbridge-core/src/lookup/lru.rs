//! Bounded LRU lookup cache with per-key fetch coalescing.
//!
//! ```text
//!  get(key) ──► fresh entry? ──yes──► rows (hit, recency bumped)
//!                   │ no
//!                   ▼
//!            fetch in flight? ──yes──► await shared fetch (coalesced)
//!                   │ no
//!                   ▼
//!          StoreFetcher::fetch(key) ──► insert, evict LRU ──► rows
//! ```
//!
//! Entries and the recency index sit behind one `parking_lot::Mutex` that
//! is never held across an `.await`. Pending fetches live in a separate
//! keyed map holding weak handles to shared futures; lock order is always
//! in-flight map first, entries second.
//!
//! Only waiters keep a fetch alive. When the last waiter is dropped the
//! store call is dropped with it, its fetch permit is released and its
//! map entry is removed.
//!
//! Recency is a strictly increasing tick assigned on every insert and hit,
//! so the eviction victim is always unique.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MissingKeyPolicy;
use crate::error::{ConnectorError, Result};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::retry::StoreFetcher;
use crate::store::{QueryRequest, StoreClient};
use crate::value::{LookupKey, RowSet};

type BoxedFetch = BoxFuture<'static, Result<RowSet>>;
type SharedFetch = Shared<BoxedFetch>;

struct Slot {
    rows: RowSet,
    inserted_at: Instant,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: FxHashMap<LookupKey, Slot>,
    recency: BTreeMap<u64, LookupKey>,
    next_tick: u64,
}

impl LruState {
    /// Returns the rows if the entry exists and has not expired, bumping
    /// its recency.
    fn fresh(&mut self, key: &LookupKey, ttl: Option<Duration>, now: Instant) -> Option<RowSet> {
        let slot = self.entries.get_mut(key)?;
        if is_expired(slot.inserted_at, ttl, now) {
            return None;
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, key.clone());
        Some(Arc::clone(&slot.rows))
    }

    /// Inserts or replaces an entry, then evicts down to `capacity`.
    /// Returns the number of evicted entries.
    fn insert(&mut self, key: LookupKey, rows: RowSet, now: Instant, capacity: usize) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        let slot = Slot {
            rows,
            inserted_at: now,
            tick,
        };
        if let Some(old) = self.entries.insert(key.clone(), slot) {
            self.recency.remove(&old.tick);
        }
        self.recency.insert(tick, key);

        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((_, victim)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&victim);
            evicted += 1;
        }
        evicted
    }

    fn remove(&mut self, key: &LookupKey) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.recency.remove(&slot.tick);
                true
            }
            None => false,
        }
    }
}

fn is_expired(inserted_at: Instant, ttl: Option<Duration>, now: Instant) -> bool {
    ttl.is_some_and(|ttl| now.saturating_duration_since(inserted_at) >= ttl)
}

struct InFlight {
    id: u64,
    fetch: WeakShared<BoxedFetch>,
    cancel: CancellationToken,
}

/// One caller's interest in a pending fetch.
///
/// Dropping it, awaited to completion or not, lets go of the shared
/// future first and then clears the map entry if nobody else holds it.
struct Waiter<S> {
    inner: Arc<LruInner<S>>,
    key: LookupKey,
    id: u64,
    fetch: Option<SharedFetch>,
}

impl<S> Waiter<S> {
    async fn wait(&mut self) -> Result<RowSet> {
        match &mut self.fetch {
            Some(fetch) => fetch.await,
            None => Err(ConnectorError::InvalidState(
                "lookup fetch already released".to_string(),
            )),
        }
    }
}

impl<S> Drop for Waiter<S> {
    fn drop(&mut self) {
        drop(self.fetch.take());
        let mut inflight = self.inner.inflight.lock();
        let abandoned = inflight
            .get(&self.key)
            .is_some_and(|pending| pending.id == self.id && pending.fetch.upgrade().is_none());
        if abandoned {
            inflight.remove(&self.key);
            debug!(key = %self.key, "lookup fetch abandoned by all waiters");
        }
    }
}

struct LruInner<S> {
    state: Mutex<LruState>,
    inflight: Mutex<FxHashMap<LookupKey, InFlight>>,
    fetcher: StoreFetcher<S>,
    capacity: usize,
    ttl: Option<Duration>,
    policy: MissingKeyPolicy,
    metrics: CacheMetrics,
    next_fetch_id: AtomicU64,
}

/// Bounded LRU cache in front of a [`StoreClient`].
///
/// Concurrent misses on the same key share a single store query.
/// Distinct keys fetch concurrently up to the fetcher's permit count.
pub struct LruCache<S> {
    inner: Arc<LruInner<S>>,
}

impl<S: StoreClient + 'static> LruCache<S> {
    /// Creates an empty cache holding at most `capacity` keys.
    #[must_use]
    pub fn new(
        fetcher: StoreFetcher<S>,
        capacity: usize,
        ttl: Option<Duration>,
        policy: MissingKeyPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(LruInner {
                state: Mutex::new(LruState::default()),
                inflight: Mutex::new(FxHashMap::default()),
                fetcher,
                capacity: capacity.max(1),
                ttl,
                policy,
                metrics: CacheMetrics::default(),
                next_fetch_id: AtomicU64::new(0),
            }),
        }
    }

    /// Looks up `key`, querying the store on a miss or an expired entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::SourceUnavailable`](crate::ConnectorError::SourceUnavailable)
    /// when the store cannot be reached within the retry budget. Failures
    /// are not cached.
    pub async fn get(&self, key: &LookupKey) -> Result<RowSet> {
        let inner = &self.inner;
        if let Some(rows) = inner.state.lock().fresh(key, inner.ttl, Instant::now()) {
            inner.metrics.record_hit();
            return Ok(rows);
        }

        let mut waiter = {
            let mut inflight = inner.inflight.lock();
            let pending = inflight
                .get(key)
                .and_then(|pending| pending.fetch.upgrade().map(|fetch| (pending.id, fetch)));
            if let Some((id, fetch)) = pending {
                inner.metrics.record_coalesced();
                Waiter {
                    inner: Arc::clone(inner),
                    key: key.clone(),
                    id,
                    fetch: Some(fetch),
                }
            } else {
                // A fetch may have landed between the first check and the lock.
                if let Some(rows) = inner.state.lock().fresh(key, inner.ttl, Instant::now()) {
                    inner.metrics.record_hit();
                    return Ok(rows);
                }
                inner.metrics.record_miss();
                let id = inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                let fetch = Self::load(Arc::clone(inner), key.clone(), id, cancel.clone())
                    .boxed()
                    .shared();
                if let Some(weak) = fetch.downgrade() {
                    inflight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            fetch: weak,
                            cancel,
                        },
                    );
                }
                Waiter {
                    inner: Arc::clone(inner),
                    key: key.clone(),
                    id,
                    fetch: Some(fetch),
                }
            }
        };

        waiter.wait().await
    }

    async fn load(
        inner: Arc<LruInner<S>>,
        key: LookupKey,
        id: u64,
        cancel: CancellationToken,
    ) -> Result<RowSet> {
        debug!(
            source = inner.fetcher.store().source_name(),
            key = %key,
            "lookup cache miss, querying store"
        );
        let request = QueryRequest::by_key(key.clone());
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectorError::InvalidState(
                "lookup fetch cancelled".to_string(),
            )),
            result = inner.fetcher.fetch(&request) => result,
        };

        let mut inflight = inner.inflight.lock();
        let outcome = result.map(|rows| {
            inner.metrics.record_store_query();
            let rows: RowSet = rows.into();
            let mut state = inner.state.lock();
            if rows.is_empty() && inner.policy == MissingKeyPolicy::Skip {
                state.remove(&key);
            } else {
                let evicted =
                    state.insert(key.clone(), Arc::clone(&rows), Instant::now(), inner.capacity);
                inner.metrics.record_evictions(evicted);
            }
            rows
        });
        if inflight.get(&key).is_some_and(|pending| pending.id == id) {
            inflight.remove(&key);
        }
        outcome
    }

    /// Drops the entry for `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &LookupKey) -> bool {
        self.inner.state.lock().remove(key)
    }

    /// Whether a fresh entry exists for `key`. Does not touch recency.
    #[must_use]
    pub fn contains(&self, key: &LookupKey) -> bool {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|slot| !is_expired(slot.inserted_at, self.inner.ttl, Instant::now()))
    }

    /// Number of entries, expired ones included until replaced or evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of keys with a store fetch in flight.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Aborts all pending fetches.
    ///
    /// Their store calls are dropped and callers awaiting them get
    /// [`ConnectorError::InvalidState`]. Nothing is cached.
    pub fn cancel_inflight(&self) {
        let drained: Vec<InFlight> = self
            .inner
            .inflight
            .lock()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for pending in &drained {
            pending.cancel.cancel();
        }
        if !drained.is_empty() {
            debug!(dropped = drained.len(), "cancelled in-flight lookup fetches");
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

impl<S: StoreClient> std::fmt::Debug for LruCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("source", &self.inner.fetcher.store().source_name())
            .field("len", &self.inner.state.lock().entries.len())
            .field("capacity", &self.inner.capacity)
            .field("ttl", &self.inner.ttl)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}
