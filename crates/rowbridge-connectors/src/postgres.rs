//! `PostgreSQL` store client.
//!
//! [`PostgresStoreClient`] implements [`StoreClient`] over a
//! `deadpool-postgres` pool. Every [`QueryRequest`] becomes one
//! parameterized `SELECT` built by [`build_select`]; rows are decoded
//! column by column according to the declared [`TableSchema`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use rowbridge_connectors::options::PostgresStoreConfig;
//! use rowbridge_connectors::postgres::PostgresStoreClient;
//! use rowbridge_core::{ScalarType, TableSchema};
//!
//! # fn example() -> rowbridge_core::Result<()> {
//! let schema = TableSchema::new([("id", ScalarType::Int64), ("name", ScalarType::Utf8)]);
//! let config = PostgresStoreConfig {
//!     connection_string: "host=localhost dbname=mydb user=app".into(),
//!     table_name: "customers".into(),
//!     ..Default::default()
//! };
//! let _client = PostgresStoreClient::new(config, schema)?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDateTime, Utc};
use rowbridge_core::{
    ColumnDef, ConnectorError, QueryRequest, Result, Row, ScalarType, ScalarValue, StoreClient,
    StoreError, TableSchema,
};
use tokio_postgres::types::{ToSql, Type};
use tracing::debug;

use crate::options::PostgresStoreConfig;

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// [`StoreClient`] backed by a `PostgreSQL` table.
pub struct PostgresStoreClient {
    pool: deadpool_postgres::Pool,
    config: PostgresStoreConfig,
    schema: TableSchema,
    columns: Vec<String>,
    name: String,
    query_count: AtomicU64,
    row_count: AtomicU64,
    error_count: AtomicU64,
}

impl PostgresStoreClient {
    /// Parses the connection string and creates the pool. Connections are
    /// opened lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on an invalid connection
    /// string, an empty table name or schema, or if pool creation fails.
    pub fn new(config: PostgresStoreConfig, schema: TableSchema) -> Result<Self> {
        if config.table_name.is_empty() {
            return Err(ConnectorError::config("postgres table name is empty"));
        }
        if schema.is_empty() {
            return Err(ConnectorError::config("postgres table schema has no columns"));
        }
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .parse()
            .map_err(|e| ConnectorError::config(format!("invalid connection string: {e}")))?;

        let mgr_config = deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        };
        let mgr =
            deadpool_postgres::Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
        let pool = deadpool_postgres::Pool::builder(mgr)
            .max_size(config.max_pool_size)
            .build()
            .map_err(|e| ConnectorError::config(format!("pool creation failed: {e}")))?;

        Ok(Self {
            pool,
            name: format!("postgres:{}", config.table_name),
            columns: schema.field_names(),
            schema,
            config,
            query_count: AtomicU64::new(0),
            row_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        })
    }

    /// Total queries executed.
    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Total rows returned.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Relaxed)
    }

    /// Total failed round trips.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &PostgresStoreConfig {
        &self.config
    }

    async fn run(&self, request: &QueryRequest) -> std::result::Result<Vec<Row>, StoreError> {
        let (sql, values) = build_select(&self.config.table_name, &self.columns, request);
        let params = values
            .iter()
            .map(to_sql_param)
            .collect::<std::result::Result<Vec<SqlParam>, StoreError>>()?;
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(format!("pool get failed: {e}")))?;
        debug!(source = %self.name, sql = %sql, params = values.len(), "postgres query");
        let statement = client
            .prepare_cached(&sql)
            .await
            .map_err(|e| map_pg_error(&e))?;
        let pg_rows = client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| map_pg_error(&e))?;

        let rows = pg_rows
            .iter()
            .map(|r| decode_row(&self.schema, r))
            .collect::<std::result::Result<Vec<Row>, StoreError>>()?;
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.row_count
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        Ok(rows)
    }
}

impl StoreClient for PostgresStoreClient {
    async fn query(&self, request: &QueryRequest) -> std::result::Result<Vec<Row>, StoreError> {
        let result = self.run(request).await;
        if result.is_err() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn source_name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> std::result::Result<(), StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(format!("health check pool get failed: {e}")))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStoreClient")
            .field("table", &self.config.table_name)
            .field("max_pool_size", &self.config.max_pool_size)
            .field("queries", &self.query_count())
            .finish_non_exhaustive()
    }
}

/// Builds the `SELECT` for `request`.
///
/// Returns `(sql, parameter values)`; `$n` placeholders carry an explicit
/// cast so integer and timestamp parameters bind regardless of the
/// column's exact width. Null key values compare with `IS NULL` and take
/// no parameter.
#[must_use]
pub fn build_select(
    table: &str,
    columns: &[String],
    request: &QueryRequest,
) -> (String, Vec<ScalarValue>) {
    let select_clause = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };

    let mut where_parts: Vec<String> = Vec::new();
    let mut params: Vec<ScalarValue> = Vec::new();

    if let Some(key) = &request.filter {
        for (column, value) in key.iter() {
            if value.is_null() {
                where_parts.push(format!("{column} IS NULL"));
            } else {
                params.push(value.clone());
                where_parts.push(format!("{column} = ${}::{}", params.len(), pg_cast(value)));
            }
        }
    }

    if let Some(bound) = &request.lower_bound {
        params.push(bound.value.clone());
        where_parts.push(format!(
            "{} > ${}::{}",
            bound.column,
            params.len(),
            pg_cast(&bound.value)
        ));
    }

    let mut sql = format!("SELECT {select_clause} FROM {table}");
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }
    if let Some(order_by) = &request.order_by {
        sql.push_str(&format!(" ORDER BY {order_by} ASC"));
    }
    (sql, params)
}

fn pg_cast(value: &ScalarValue) -> &'static str {
    match value {
        ScalarValue::Null => "TEXT",
        ScalarValue::Bool(_) => "BOOL",
        ScalarValue::Int64(_) => "INT8",
        ScalarValue::Float64(_) => "FLOAT8",
        ScalarValue::Utf8(_) => "TEXT",
        ScalarValue::Binary(_) => "BYTEA",
        ScalarValue::Timestamp(_) => "TIMESTAMP",
    }
}

fn to_sql_param(value: &ScalarValue) -> std::result::Result<SqlParam, StoreError> {
    Ok(match value {
        ScalarValue::Null => Box::new(Option::<String>::None),
        ScalarValue::Bool(b) => Box::new(*b),
        ScalarValue::Int64(n) => Box::new(*n),
        ScalarValue::Float64(f) => Box::new(*f),
        ScalarValue::Utf8(s) => Box::new(s.clone()),
        ScalarValue::Binary(b) => Box::new(b.clone()),
        ScalarValue::Timestamp(us) => {
            let ts = DateTime::<Utc>::from_timestamp_micros(*us).ok_or_else(|| {
                StoreError::Query(format!("timestamp {us}us is out of range"))
            })?;
            Box::new(ts.naive_utc())
        }
    })
}

fn decode_row(schema: &TableSchema, row: &tokio_postgres::Row) -> std::result::Result<Row, StoreError> {
    let mut fields = Vec::with_capacity(schema.len());
    for column in schema.columns() {
        fields.push((column.name.clone(), decode_column(row, column)?));
    }
    Ok(Row::new(fields))
}

fn decode_column(
    row: &tokio_postgres::Row,
    column: &ColumnDef,
) -> std::result::Result<ScalarValue, StoreError> {
    let idx = column.index;
    let pg_type = row
        .columns()
        .get(idx)
        .map(|c| c.type_().clone())
        .ok_or_else(|| StoreError::Query(format!("result has no column {idx}")))?;
    let err = |e: tokio_postgres::Error| {
        StoreError::Query(format!(
            "cannot decode column '{}' ({pg_type}) as {}: {e}",
            column.name, column.scalar_type
        ))
    };

    let value = match column.scalar_type {
        ScalarType::Bool => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(err)?
            .map(ScalarValue::Bool),
        ScalarType::Int64 => {
            if pg_type == Type::INT2 {
                row.try_get::<_, Option<i16>>(idx)
                    .map_err(err)?
                    .map(|v| ScalarValue::Int64(i64::from(v)))
            } else if pg_type == Type::INT4 {
                row.try_get::<_, Option<i32>>(idx)
                    .map_err(err)?
                    .map(|v| ScalarValue::Int64(i64::from(v)))
            } else {
                row.try_get::<_, Option<i64>>(idx)
                    .map_err(err)?
                    .map(ScalarValue::Int64)
            }
        }
        ScalarType::Float64 => {
            if pg_type == Type::FLOAT4 {
                row.try_get::<_, Option<f32>>(idx)
                    .map_err(err)?
                    .map(|v| ScalarValue::Float64(f64::from(v)))
            } else {
                row.try_get::<_, Option<f64>>(idx)
                    .map_err(err)?
                    .map(ScalarValue::Float64)
            }
        }
        ScalarType::Utf8 => row
            .try_get::<_, Option<String>>(idx)
            .map_err(err)?
            .map(ScalarValue::Utf8),
        ScalarType::Binary => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(err)?
            .map(ScalarValue::Binary),
        ScalarType::Timestamp => {
            if pg_type == Type::TIMESTAMPTZ {
                row.try_get::<_, Option<DateTime<Utc>>>(idx)
                    .map_err(err)?
                    .map(|ts| ScalarValue::Timestamp(ts.timestamp_micros()))
            } else {
                row.try_get::<_, Option<NaiveDateTime>>(idx)
                    .map_err(err)?
                    .map(|ts| ScalarValue::Timestamp(ts.and_utc().timestamp_micros()))
            }
        }
    };
    Ok(value.unwrap_or(ScalarValue::Null))
}

/// Closed connections and SQLSTATE classes 08 (connection exception) and
/// 57 (operator intervention) are transient; everything else is a query
/// failure.
fn map_pg_error(e: &tokio_postgres::Error) -> StoreError {
    let transient_state = e
        .code()
        .is_some_and(|state| is_transient_sqlstate(state.code()));
    if e.is_closed() || transient_state {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Query(e.to_string())
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57")
}
