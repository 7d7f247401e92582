//! # Lookup Module
//!
//! Point lookups against an external table for join-style enrichment.
//!
//! ## Module Overview
//!
//! - [`cache`]: `LookupCache` trait and `AnyLookupCache` strategy dispatch
//! - [`lru`]: bounded LRU cache with per-key fetch coalescing
//! - [`full_table`]: whole-table cache with background reload
//! - [`executor`]: per-worker `LookupExecutor`
//! - [`keys`]: key field path resolution

pub mod cache;
/// Per-worker lookup executor.
pub mod executor;
pub mod full_table;
pub mod keys;
pub mod lru;

pub use cache::{AnyLookupCache, LookupCache};
pub use executor::LookupExecutor;
pub use full_table::FullTableCache;
pub use keys::resolve_key_columns;
pub use lru::LruCache;
