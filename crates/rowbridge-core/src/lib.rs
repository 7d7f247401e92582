//! # Rowbridge Core
//!
//! Lookup caching and resumable scans over external relational stores.
//!
//! The host engine reaches a table in two ways:
//!
//! - **Point lookups** through a [`LookupExecutor`], backed by either a
//!   bounded [`LruCache`] that refills from the store on miss, or a
//!   [`FullTableCache`] that holds the whole table and reloads it
//!   periodically.
//! - **Bulk scans** through a [`ScanDriver`], which hands out rows in
//!   batches and records a [`ScanCheckpoint`] so a restarted scan resumes
//!   after the last emitted restore-column value.
//!
//! Stores plug in through the [`StoreClient`] trait.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod error_codes;
pub mod lookup;
pub mod metrics;
pub mod retry;
pub mod scan;
pub mod store;
pub mod testing;
pub mod value;

pub use config::{
    BackoffKind, CacheConfig, CacheStrategy, LookupConfig, MissingKeyPolicy, RetryConfig,
    ScanConfig,
};
pub use error::{ConnectorError, Result};
pub use lookup::{AnyLookupCache, FullTableCache, LookupCache, LookupExecutor, LruCache};
pub use metrics::{CacheMetricsSnapshot, ScanMetricsSnapshot};
pub use retry::{Backoff, StoreFetcher};
pub use scan::{ScanCheckpoint, ScanCursor, ScanDriver, ScanState};
pub use store::{QueryRequest, RowCodec, ScanBound, StoreClient, StoreError};
pub use value::{ColumnDef, LookupKey, Row, RowSet, ScalarType, ScalarValue, TableSchema};
