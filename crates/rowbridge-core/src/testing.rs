//! In-memory [`StoreClient`] for tests and local development.
//!
//! Counts round trips, can inject latency and failures, and can pretend
//! to be a store that ignores `ORDER BY` so monotonicity checks have
//! something to catch.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::store::{QueryRequest, StoreClient, StoreError};
use crate::value::Row;

/// A [`StoreClient`] over a `Vec<Row>`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: RwLock<Vec<Row>>,
    name: String,
    latency: Option<Duration>,
    ignore_order: bool,
    fail_next: AtomicU32,
    fatal: AtomicBool,
    queries: AtomicU64,
    query_alls: AtomicU64,
}

impl InMemoryStore {
    /// Creates a store holding `rows`.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: RwLock::new(rows),
            name: "in-memory".to_string(),
            ..Self::default()
        }
    }

    /// Sleeps this long inside every round trip.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns rows in storage order even when ordering is requested.
    #[must_use]
    pub fn unordered(mut self) -> Self {
        self.ignore_order = true;
        self
    }

    /// Overrides the source name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fails the next `n` round trips with a transient connection error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Makes every round trip fail with a non-retryable query error.
    pub fn set_fatal(&self, fatal: bool) {
        self.fatal.store(fatal, Ordering::SeqCst);
    }

    /// Replaces the table contents.
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.write() = rows;
    }

    /// Appends a row.
    pub fn push(&self, row: Row) {
        self.rows.write().push(row);
    }

    /// Filtered round trips served or attempted so far.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    /// Full-table round trips served or attempted so far.
    #[must_use]
    pub fn query_all_count(&self) -> u64 {
        self.query_alls.load(Ordering::SeqCst)
    }

    async fn round_trip(&self, request: &QueryRequest) -> Result<Vec<Row>, StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fatal.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected fatal failure".to_string()));
        }
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Connection("injected transient failure".to_string()));
        }

        let mut rows: Vec<Row> = self
            .rows
            .read()
            .iter()
            .filter(|row| request.filter.as_ref().map_or(true, |key| key.matches(row)))
            .filter(|row| {
                request.lower_bound.as_ref().map_or(true, |bound| {
                    row.get(&bound.column)
                        .and_then(|v| v.compare(&bound.value))
                        == Some(CmpOrdering::Greater)
                })
            })
            .cloned()
            .collect();

        if let (Some(column), false) = (&request.order_by, self.ignore_order) {
            rows.sort_by(|a, b| match (a.get(column), b.get(column)) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(CmpOrdering::Equal),
                _ => CmpOrdering::Equal,
            });
        }
        Ok(rows)
    }
}

impl StoreClient for InMemoryStore {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Row>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.round_trip(request).await
    }

    async fn query_all(&self) -> Result<Vec<Row>, StoreError> {
        self.query_alls.fetch_add(1, Ordering::SeqCst);
        self.round_trip(&QueryRequest::default()).await
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}
