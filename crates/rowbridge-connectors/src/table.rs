//! Declared table wiring.
//!
//! A [`TableSource`] ties a table schema, its parsed options and a store
//! client together and hands out the two runtimes the host engine asks
//! for: lookup executors for join-style enrichment and scan drivers for
//! bulk reads.

use std::sync::Arc;

use rowbridge_core::config::{LookupConfig, ScanConfig};
use rowbridge_core::lookup::resolve_key_columns;
use rowbridge_core::{AnyLookupCache, LookupExecutor, Result, ScanDriver, StoreClient, TableSchema};
use tracing::info;

use crate::options::ConnectorOptions;

/// Executors built for one lookup join.
pub type LookupRuntime<S> = Vec<LookupExecutor<AnyLookupCache<S>>>;

/// One declared table backed by a store.
pub struct TableSource<S> {
    schema: TableSchema,
    lookup: LookupConfig,
    scan: ScanConfig,
    store: Arc<S>,
}

impl<S: StoreClient + 'static> TableSource<S> {
    /// Builds from already typed configuration.
    #[must_use]
    pub fn new(schema: TableSchema, lookup: LookupConfig, scan: ScanConfig, store: Arc<S>) -> Self {
        Self {
            schema,
            lookup,
            scan,
            store,
        }
    }

    /// Builds from a `WITH (...)` option map.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`](rowbridge_core::ConnectorError::Configuration)
    /// on unknown keys or values that do not parse.
    pub fn from_options(schema: TableSchema, options: &ConnectorOptions, store: Arc<S>) -> Result<Self> {
        let lookup = options.lookup_config()?;
        let scan = options.scan_config()?;
        Ok(Self::new(schema, lookup, scan, store))
    }

    /// Lookup executors for a join on the given key field paths.
    ///
    /// Each path indexes into the table schema; only top-level columns
    /// are supported. One executor is built per configured worker.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`](rowbridge_core::ConnectorError::Configuration)
    /// for nested or out-of-range key paths and invalid settings, or the
    /// store error if the health check or a full-table load fails.
    pub async fn lookup_runtime(&self, key_paths: &[Vec<usize>]) -> Result<LookupRuntime<S>> {
        let key_columns = resolve_key_columns(&self.schema, key_paths)?;
        let config = LookupConfig {
            key_columns,
            ..self.lookup.clone()
        };
        let workers =
            LookupExecutor::open_workers(&config, &self.schema, Arc::clone(&self.store)).await?;
        info!(
            source = self.store.source_name(),
            workers = workers.len(),
            keys = ?config.key_columns,
            "lookup runtime ready"
        );
        Ok(workers)
    }

    /// A fresh scan driver; seed it with
    /// [`ScanDriver::restore`] to resume.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`](rowbridge_core::ConnectorError::Configuration)
    /// if the restore column is not in the schema.
    pub fn scan_runtime(&self) -> Result<ScanDriver<S>> {
        ScanDriver::new(&self.scan, &self.schema, Arc::clone(&self.store))
    }

    /// The declared schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Lookup settings, key columns unset.
    #[must_use]
    pub fn lookup_config(&self) -> &LookupConfig {
        &self.lookup
    }

    /// Scan settings.
    #[must_use]
    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }

    /// The shared store client.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(feature = "postgres")]
impl TableSource<crate::postgres::PostgresStoreClient> {
    /// Builds a Postgres-backed table from its option map.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`](rowbridge_core::ConnectorError::Configuration)
    /// on missing connection settings or invalid options.
    pub fn postgres(schema: TableSchema, options: &ConnectorOptions) -> Result<Self> {
        let client =
            crate::postgres::PostgresStoreClient::new(options.postgres_config()?, schema.clone())?;
        Self::from_options(schema, options, Arc::new(client))
    }
}

impl<S: StoreClient> std::fmt::Debug for TableSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSource")
            .field("source", &self.store.source_name())
            .field("columns", &self.schema.len())
            .field("strategy", &self.lookup.cache.strategy)
            .field("restore_column", &self.scan.restore_column)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbridge_core::testing::InMemoryStore;
    use rowbridge_core::{ConnectorError, Row, ScalarType, ScalarValue};

    fn schema() -> TableSchema {
        TableSchema::new([("id", ScalarType::Int64), ("name", ScalarType::Utf8)])
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new(vec![
            Row::from_pairs([("id", ScalarValue::Int64(1)), ("name", "a".into())]),
            Row::from_pairs([("id", ScalarValue::Int64(2)), ("name", "b".into())]),
        ]))
    }

    #[tokio::test]
    async fn test_lookup_runtime_resolves_key_paths() {
        let options = ConnectorOptions::from_pairs([("lookup.parallelism", "2")]);
        let table = TableSource::from_options(schema(), &options, store()).unwrap();
        let workers = table.lookup_runtime(&[vec![1]]).await.unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].key_columns(), ["name".to_string()]);
        let rows = workers[1].lookup(vec!["b".into()]).await.unwrap();
        assert_eq!(rows[0].get("id"), Some(&ScalarValue::Int64(2)));
    }

    #[tokio::test]
    async fn test_nested_key_path_rejected() {
        let table = TableSource::from_options(schema(), &ConnectorOptions::default(), store()).unwrap();
        let err = table.lookup_runtime(&[vec![0, 1]]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration(_)));
        assert!(err
            .to_string()
            .contains("only non-nested lookup keys are supported"));
    }

    #[test]
    fn test_scan_runtime_unknown_restore_column() {
        let options = ConnectorOptions::from_pairs([("scan.restore-column", "ts")]);
        let table = TableSource::from_options(schema(), &options, store()).unwrap();
        let err = table.scan_runtime().unwrap_err();
        assert!(err.to_string().contains("unknown restore column name: ts"));
    }
}
