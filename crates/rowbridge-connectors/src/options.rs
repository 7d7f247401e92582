//! `WITH (...)` option parsing.
//!
//! [`ConnectorOptions`] wraps the raw string map of a table declaration and
//! turns it into the typed [`LookupConfig`], [`ScanConfig`] and
//! [`PostgresStoreConfig`]. Unknown keys are rejected so that typos fail at
//! startup instead of silently falling back to defaults.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use rowbridge_core::config::{
    BackoffKind, CacheStrategy, LookupConfig, MissingKeyPolicy, RetryConfig, ScanConfig,
};
use rowbridge_core::{ConnectorError, Result};

// ── Keys ──

/// Lookup cache strategy: `lru` | `all`.
pub const LOOKUP_CACHE: &str = "lookup.cache";
/// LRU capacity in keys.
pub const LOOKUP_CACHE_MAX_ROWS: &str = "lookup.cache.max-rows";
/// TTL (LRU) or reload period (full table) in ms; `0` disables.
pub const LOOKUP_CACHE_TTL_MS: &str = "lookup.cache.ttl-ms";
/// `cache-empty` | `skip`.
pub const LOOKUP_CACHE_MISSING_KEY: &str = "lookup.cache.missing-key";
/// Concurrent fetches for distinct keys.
pub const LOOKUP_ASYNC: &str = "lookup.async";
/// Fetch permits per worker.
pub const LOOKUP_CONCURRENCY: &str = "lookup.concurrency";
/// Lookup worker count.
pub const LOOKUP_PARALLELISM: &str = "lookup.parallelism";
/// Retry budget after the first attempt.
pub const LOOKUP_MAX_RETRIES: &str = "lookup.max-retries";
/// `fixed` | `exponential`.
pub const LOOKUP_RETRY_BACKOFF: &str = "lookup.retry.backoff";
/// First retry delay in ms.
pub const LOOKUP_RETRY_INITIAL_MS: &str = "lookup.retry.initial-ms";
/// Retry delay cap in ms.
pub const LOOKUP_RETRY_MAX_MS: &str = "lookup.retry.max-ms";
/// Exponential growth factor.
pub const LOOKUP_RETRY_MULTIPLIER: &str = "lookup.retry.multiplier";
/// Spread retry delays.
pub const LOOKUP_RETRY_JITTER: &str = "lookup.retry.jitter";
/// Per round trip timeout in ms.
pub const STORE_TIMEOUT_MS: &str = "store.timeout-ms";
/// Restore column for resumable scans.
pub const SCAN_RESTORE_COLUMN: &str = "scan.restore-column";
/// Rows per emitted scan batch.
pub const SCAN_FETCH_SIZE: &str = "scan.fetch-size";
/// Scan parallelism hint.
pub const SCAN_PARALLELISM: &str = "scan.parallelism";
/// Postgres connection string.
pub const CONNECTION: &str = "connection";
/// Table to read, optionally schema-qualified.
pub const TABLE_NAME: &str = "table-name";
/// Postgres pool size.
pub const POOL_MAX_SIZE: &str = "pool.max-size";
/// Connector identifier, accepted and ignored.
pub const CONNECTOR: &str = "connector";

const SUPPORTED: &[&str] = &[
    LOOKUP_CACHE,
    LOOKUP_CACHE_MAX_ROWS,
    LOOKUP_CACHE_TTL_MS,
    LOOKUP_CACHE_MISSING_KEY,
    LOOKUP_ASYNC,
    LOOKUP_CONCURRENCY,
    LOOKUP_PARALLELISM,
    LOOKUP_MAX_RETRIES,
    LOOKUP_RETRY_BACKOFF,
    LOOKUP_RETRY_INITIAL_MS,
    LOOKUP_RETRY_MAX_MS,
    LOOKUP_RETRY_MULTIPLIER,
    LOOKUP_RETRY_JITTER,
    STORE_TIMEOUT_MS,
    SCAN_RESTORE_COLUMN,
    SCAN_FETCH_SIZE,
    SCAN_PARALLELISM,
    CONNECTION,
    TABLE_NAME,
    POOL_MAX_SIZE,
    CONNECTOR,
];

/// Option map errors. Surface as [`ConnectorError::Configuration`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// A required key is absent or empty.
    #[error("missing required option '{0}'")]
    Missing(&'static str),

    /// A value does not parse.
    #[error("invalid value for option '{key}': '{value}' ({reason})")]
    Invalid {
        /// Option key.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Keys not recognised by any connector surface.
    #[error("unsupported options: {}", .0.join(", "))]
    Unsupported(Vec<String>),
}

impl From<OptionsError> for ConnectorError {
    fn from(e: OptionsError) -> Self {
        ConnectorError::Configuration(e.to_string())
    }
}

/// Postgres store client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresStoreConfig {
    /// Key-value (`host=... dbname=...`) or URI connection string.
    pub connection_string: String,
    /// Table name, may be schema-qualified (`public.customers`).
    pub table_name: String,
    /// Maximum pooled connections (default: 10).
    pub max_pool_size: usize,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            table_name: String::new(),
            max_pool_size: 10,
        }
    }
}

/// The raw option map of one table declaration.
#[derive(Debug, Clone, Default)]
pub struct ConnectorOptions {
    options: HashMap<String, String>,
}

impl ConnectorOptions {
    /// Wraps an option map. Keys and values are trimmed.
    #[must_use]
    pub fn new(options: HashMap<String, String>) -> Self {
        Self {
            options: options
                .into_iter()
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect(),
        }
    }

    /// Builds from `(key, value)` pairs.
    #[must_use]
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Sets one option.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options
            .insert(key.into().trim().to_string(), value.into().trim().to_string());
    }

    /// Raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Raw value of `key`, which must be present and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Missing`].
    pub fn require(&self, key: &'static str) -> std::result::Result<&str, OptionsError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or(OptionsError::Missing(key))
    }

    /// Rejects keys no connector surface understands.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::Unsupported`] listing the offending keys.
    pub fn check_supported(&self) -> std::result::Result<(), OptionsError> {
        let mut unknown: Vec<String> = self
            .options
            .keys()
            .filter(|k| !SUPPORTED.contains(&k.as_str()))
            .cloned()
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort();
        Err(OptionsError::Unsupported(unknown))
    }

    /// Point-lookup settings. Key columns are left empty; they come from
    /// the join condition at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on unknown keys or values
    /// that do not parse.
    pub fn lookup_config(&self) -> Result<LookupConfig> {
        self.check_supported()?;
        let mut cfg = LookupConfig::default();

        if let Some(strategy) = self.parse_enum::<CacheStrategy>(LOOKUP_CACHE)? {
            cfg.cache.strategy = strategy;
        }
        if let Some(rows) = self.parse::<usize>(LOOKUP_CACHE_MAX_ROWS)? {
            cfg.cache.max_size = Some(rows);
        }
        if let Some(ttl) = self.millis(LOOKUP_CACHE_TTL_MS)? {
            cfg.cache.ttl = (!ttl.is_zero()).then_some(ttl);
        }
        if let Some(policy) = self.parse_enum::<MissingKeyPolicy>(LOOKUP_CACHE_MISSING_KEY)? {
            cfg.cache.missing_key_policy = policy;
        }
        if let Some(refresh_ahead) = self.flag(LOOKUP_ASYNC)? {
            cfg.cache.refresh_ahead = refresh_ahead;
        }
        if let Some(n) = self.parse::<usize>(LOOKUP_CONCURRENCY)? {
            cfg.concurrency = n;
        }
        if let Some(n) = self.parse::<usize>(LOOKUP_PARALLELISM)? {
            cfg.parallelism = n;
        }
        if let Some(timeout) = self.millis(STORE_TIMEOUT_MS)? {
            cfg.timeout = timeout;
        }
        cfg.retry = self.retry_config()?;
        Ok(cfg)
    }

    /// Scan settings. The retry keys apply to the scan query as well.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on unknown keys, values
    /// that do not parse, or an invalid combination.
    pub fn scan_config(&self) -> Result<ScanConfig> {
        self.check_supported()?;
        let mut cfg = ScanConfig {
            restore_column: self
                .get(SCAN_RESTORE_COLUMN)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            retry: self.retry_config()?,
            ..ScanConfig::default()
        };
        if let Some(n) = self.parse::<usize>(SCAN_FETCH_SIZE)? {
            cfg.fetch_size = n;
        }
        if let Some(n) = self.parse::<usize>(SCAN_PARALLELISM)? {
            cfg.parallelism = n;
        }
        if let Some(timeout) = self.millis(STORE_TIMEOUT_MS)? {
            cfg.timeout = timeout;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Postgres store client settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if `connection` or
    /// `table-name` is missing, or the pool size is zero.
    pub fn postgres_config(&self) -> Result<PostgresStoreConfig> {
        let mut cfg = PostgresStoreConfig {
            connection_string: self.require(CONNECTION)?.to_string(),
            table_name: self.require(TABLE_NAME)?.to_string(),
            ..PostgresStoreConfig::default()
        };
        if let Some(n) = self.parse::<usize>(POOL_MAX_SIZE)? {
            if n == 0 {
                return Err(ConnectorError::config("pool.max-size must be > 0"));
            }
            cfg.max_pool_size = n;
        }
        Ok(cfg)
    }

    fn retry_config(&self) -> Result<RetryConfig> {
        let mut retry = RetryConfig::default();
        if let Some(n) = self.parse::<u32>(LOOKUP_MAX_RETRIES)? {
            retry.max_retries = n;
        }
        if let Some(kind) = self.parse_enum::<BackoffKind>(LOOKUP_RETRY_BACKOFF)? {
            retry.backoff = kind;
        }
        if let Some(d) = self.millis(LOOKUP_RETRY_INITIAL_MS)? {
            retry.initial_delay = d;
        }
        if let Some(d) = self.millis(LOOKUP_RETRY_MAX_MS)? {
            retry.max_delay = d;
        }
        if let Some(m) = self.parse::<f64>(LOOKUP_RETRY_MULTIPLIER)? {
            retry.backoff_multiplier = m;
        }
        if let Some(jitter) = self.flag(LOOKUP_RETRY_JITTER)? {
            retry.jitter = jitter;
        }
        Ok(retry)
    }

    fn parse<T>(&self, key: &'static str) -> std::result::Result<Option<T>, OptionsError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|v| {
                v.parse::<T>().map_err(|e| OptionsError::Invalid {
                    key,
                    value: v.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse_enum<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr<Err = ConnectorError>,
    {
        self.get(key).map(str::parse::<T>).transpose()
    }

    fn millis(&self, key: &'static str) -> std::result::Result<Option<Duration>, OptionsError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    fn flag(&self, key: &'static str) -> std::result::Result<Option<bool>, OptionsError> {
        self.get(key)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(OptionsError::Invalid {
                    key,
                    value: v.to_string(),
                    reason: "expected true or false".to_string(),
                }),
            })
            .transpose()
    }
}
