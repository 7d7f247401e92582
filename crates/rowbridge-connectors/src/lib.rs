//! # Rowbridge Connectors
//!
//! Store clients and configuration surfaces for `rowbridge-core`.
//!
//! - [`options`]: `WITH (...)` option map parsing into typed configs
//! - [`codec`]: JSON [`RowCodec`](rowbridge_core::RowCodec)
//! - [`postgres`]: `PostgreSQL` [`StoreClient`](rowbridge_core::StoreClient)
//!   (feature `postgres`)
//! - [`table`]: [`TableSource`] handing out lookup and scan runtimes

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// JSON row codec.
pub mod codec;

/// Option map parsing.
pub mod options;

/// `PostgreSQL` store client.
#[cfg(feature = "postgres")]
pub mod postgres;

/// Table-level wiring of schema, options and store.
pub mod table;

pub use codec::JsonRowCodec;
pub use options::{ConnectorOptions, OptionsError, PostgresStoreConfig};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStoreClient;
pub use table::{LookupRuntime, TableSource};
