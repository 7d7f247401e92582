//! Store access traits.
//!
//! [`StoreClient`] is the only way the caches and the scan driver reach the
//! external table. It uses RPITIT (Rust 1.75+) so implementations write
//! plain `async fn` without `async_trait` boxing; consequently it is not
//! dyn-compatible and consumers are generic over `S: StoreClient`.
//!
//! [`RowCodec`] converts between the store's raw record shape and [`Row`].

use std::future::Future;
use std::time::Duration;

use crate::error::{ConnectorError, Result};
use crate::value::{LookupKey, Row, ScalarValue};

/// Errors from store round trips.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Connection to the store failed or was dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The round trip did not finish in time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The store rejected or failed the query.
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether the same request may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

impl From<StoreError> for ConnectorError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::TransientStore(err.to_string())
        } else {
            Self::SourceUnavailable {
                attempts: 1,
                reason: err.to_string(),
            }
        }
    }
}

/// Lower bound on an ordered column: `column > value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanBound {
    /// Restore column name.
    pub column: String,
    /// Exclusive lower bound.
    pub value: ScalarValue,
}

/// A filtered, optionally ordered read of the backing table.
///
/// The default request reads the whole table unordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    /// Equality filter on the key columns.
    pub filter: Option<LookupKey>,
    /// Exclusive lower bound on an ordered column.
    pub lower_bound: Option<ScanBound>,
    /// Column to sort ascending by.
    pub order_by: Option<String>,
}

impl QueryRequest {
    /// Point lookup: every row whose key columns equal `key`.
    #[must_use]
    pub fn by_key(key: LookupKey) -> Self {
        Self {
            filter: Some(key),
            ..Self::default()
        }
    }

    /// Ordered scan from an optional exclusive lower bound.
    #[must_use]
    pub fn scan(order_by: Option<String>, lower_bound: Option<ScanBound>) -> Self {
        Self {
            filter: None,
            lower_bound,
            order_by,
        }
    }
}

/// Async access to an external tabular store.
pub trait StoreClient: Send + Sync {
    /// Run a filtered read and return the matching rows.
    ///
    /// When `order_by` is set the rows must come back sorted ascending by
    /// that column; the scan driver relies on it.
    fn query(
        &self,
        request: &QueryRequest,
    ) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send;

    /// Read every row of the table. Used by the full-table cache.
    fn query_all(&self) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send {
        async move {
            let request = QueryRequest::default();
            self.query(&request).await
        }
    }

    /// Source name for logging and metrics.
    fn source_name(&self) -> &str;

    /// Health check. Default: always healthy.
    fn health_check(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }
}

/// Converts between a store's raw record shape and [`Row`].
pub trait RowCodec: Send + Sync {
    /// Raw record type produced and consumed by the store.
    type Raw;

    /// Decode one raw record.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Codec`](crate::ConnectorError::Codec) on
    /// malformed input.
    fn decode(&self, raw: &Self::Raw) -> Result<Row>;

    /// Encode one row.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Codec`](crate::ConnectorError::Codec) when
    /// the row cannot be represented.
    fn encode(&self, row: &Row) -> Result<Self::Raw>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct FixedStore(Vec<Row>);

    impl StoreClient for FixedStore {
        async fn query(&self, request: &QueryRequest) -> Result<Vec<Row>, StoreError> {
            Ok(self
                .0
                .iter()
                .filter(|r| request.filter.as_ref().map_or(true, |k| k.matches(r)))
                .cloned()
                .collect())
        }

        fn source_name(&self) -> &str {
            "fixed"
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::from_pairs([("id", ScalarValue::Int64(1))]),
            Row::from_pairs([("id", ScalarValue::Int64(2))]),
        ]
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Connection("reset".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StoreError::Query("syntax error".into()).is_transient());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: ConnectorError = StoreError::Connection("reset".into()).into();
        assert!(err.is_retryable());
        let err: ConnectorError = StoreError::Query("bad".into()).into();
        assert!(matches!(err, ConnectorError::SourceUnavailable { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_query_all_default_reads_everything() {
        let store = FixedStore(rows());
        assert_eq!(store.query_all().await.unwrap().len(), 2);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_by_key_filters() {
        let store = FixedStore(rows());
        let cols: Arc<[String]> = vec!["id".to_string()].into();
        let key = LookupKey::new(cols, vec![ScalarValue::Int64(2)]).unwrap();
        let found = store.query(&QueryRequest::by_key(key)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("id"), Some(&ScalarValue::Int64(2)));
    }
}
