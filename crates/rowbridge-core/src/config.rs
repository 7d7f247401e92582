//! Lookup and scan configuration.
//!
//! Plain structs with documented defaults, passed explicitly at
//! construction. String-option parsing lives in the connectors crate;
//! the enum-valued options here implement `FromStr` for it.

use std::time::Duration;

use tracing::warn;

use crate::error::{ConnectorError, Result};
use crate::value::TableSchema;

/// Default LRU capacity when `max_size` is not set.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

/// Cache strategy for point lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Bounded LRU cache, refilled from the store on miss.
    #[default]
    Lru,
    /// Whole table held in memory, reloaded periodically.
    All,
}

str_enum!(CacheStrategy, lowercase, "unknown lookup cache type",
    Lru => "lru";
    All => "all"
);

/// What to do when the store has no rows for a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingKeyPolicy {
    /// Cache the empty result so repeated misses cost one query per TTL.
    #[default]
    CacheEmpty,
    /// Never cache empty results.
    Skip,
}

str_enum!(MissingKeyPolicy, lowercase_udash, "unknown missing-key policy",
    CacheEmpty => "cache-empty", "empty";
    Skip => "skip"
);

/// Delay growth between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffKind {
    /// Same delay before every retry.
    Fixed,
    /// Delay multiplied by `backoff_multiplier` after every retry.
    #[default]
    Exponential,
}

str_enum!(BackoffKind, lowercase, "unknown retry backoff",
    Fixed => "fixed";
    Exponential => "exponential", "exp"
);

/// Cache settings for one lookup executor.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache strategy (default: LRU).
    pub strategy: CacheStrategy,
    /// LRU capacity in keys. Ignored by the full-table cache.
    pub max_size: Option<usize>,
    /// Entry TTL (LRU) or reload period (full table). `None` never expires.
    pub ttl: Option<Duration>,
    /// Allow concurrent store fetches for distinct keys.
    pub refresh_ahead: bool,
    /// Whether empty results are cached.
    pub missing_key_policy: MissingKeyPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::Lru,
            max_size: None,
            ttl: Some(Duration::from_secs(60)),
            refresh_ahead: true,
            missing_key_policy: MissingKeyPolicy::CacheEmpty,
        }
    }
}

impl CacheConfig {
    /// LRU capacity with the default applied.
    #[must_use]
    pub fn effective_max_size(&self) -> usize {
        self.max_size.unwrap_or(DEFAULT_MAX_ROWS)
    }
}

/// Retry policy for store round trips.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Delay growth (default: exponential).
    pub backoff: BackoffKind,
    /// First retry delay (default: 100ms).
    pub initial_delay: Duration,
    /// Delay cap (default: 10s).
    pub max_delay: Duration,
    /// Growth factor for exponential backoff (default: 2.0).
    pub backoff_multiplier: f64,
    /// Spread delays by up to ±12.5% (default: false).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffKind::Exponential,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Validates the retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on a non-positive
    /// multiplier or an initial delay above the cap.
    pub fn validate(&self) -> Result<()> {
        if self.backoff == BackoffKind::Exponential && self.backoff_multiplier < 1.0 {
            return Err(ConnectorError::config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConnectorError::config(format!(
                "initial retry delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Point-lookup configuration.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Columns forming the lookup key, in key order.
    pub key_columns: Vec<String>,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Retry policy for cache misses.
    pub retry: RetryConfig,
    /// Per round trip timeout (default: 30s).
    pub timeout: Duration,
    /// Concurrent store fetches per executor when refresh-ahead is on.
    pub concurrency: usize,
    /// Number of independent executors (default: 1).
    pub parallelism: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            key_columns: Vec::new(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            concurrency: 16,
            parallelism: 1,
        }
    }
}

impl LookupConfig {
    /// Creates a config with default settings for the given key columns.
    #[must_use]
    pub fn new<S: Into<String>>(key_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Effective number of concurrent store fetches per executor.
    #[must_use]
    pub fn fetch_permits(&self) -> usize {
        if self.cache.refresh_ahead {
            self.concurrency
        } else {
            1
        }
    }

    /// Validates the configuration against the table schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if no key columns are
    /// set, a key column is not in the schema, or a size is zero.
    pub fn validate(&self, schema: &TableSchema) -> Result<()> {
        if self.key_columns.is_empty() {
            return Err(ConnectorError::config("no lookup key columns configured"));
        }
        for column in &self.key_columns {
            if schema.column(column).is_none() {
                return Err(ConnectorError::config(format!(
                    "unknown lookup key column: {column}"
                )));
            }
        }
        if self.concurrency == 0 {
            return Err(ConnectorError::config("lookup concurrency must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(ConnectorError::config("lookup parallelism must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConnectorError::config("store timeout must be > 0"));
        }
        match self.cache.strategy {
            CacheStrategy::Lru => {
                if self.cache.max_size == Some(0) {
                    return Err(ConnectorError::config("lookup cache max size must be > 0"));
                }
            }
            CacheStrategy::All => {
                if let Some(max_size) = self.cache.max_size {
                    warn!(
                        max_size,
                        "lookup cache max size is ignored by the full-table cache"
                    );
                }
            }
        }
        self.retry.validate()
    }
}

/// Bulk scan configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Column used to record and resume the scan position.
    pub restore_column: Option<String>,
    /// Rows per emitted batch (default: 1024).
    pub fetch_size: usize,
    /// Retry policy for the scan query.
    pub retry: RetryConfig,
    /// Per round trip timeout (default: 30s).
    pub timeout: Duration,
    /// Parallelism hint for the host engine (default: 1).
    pub parallelism: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            restore_column: None,
            fetch_size: 1024,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            parallelism: 1,
        }
    }
}

impl ScanConfig {
    /// Validates sizes and the retry policy.
    ///
    /// The restore column is resolved separately against the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on zero sizes.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(ConnectorError::config("scan fetch size must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(ConnectorError::config("scan parallelism must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConnectorError::config("store timeout must be > 0"));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarType;

    fn schema() -> TableSchema {
        TableSchema::new([("id", ScalarType::Int64), ("name", ScalarType::Utf8)])
    }

    #[test]
    fn test_cache_strategy_parse() {
        assert_eq!("LRU".parse::<CacheStrategy>().unwrap(), CacheStrategy::Lru);
        assert_eq!(" all ".parse::<CacheStrategy>().unwrap(), CacheStrategy::All);
        let err = "fifo".parse::<CacheStrategy>().unwrap_err();
        assert!(err.to_string().contains("unknown lookup cache type: 'fifo'"));
        assert_eq!(CacheStrategy::All.to_string(), "all");
    }

    #[test]
    fn test_missing_key_policy_parse() {
        assert_eq!(
            "CACHE_EMPTY".parse::<MissingKeyPolicy>().unwrap(),
            MissingKeyPolicy::CacheEmpty
        );
        assert_eq!("skip".parse::<MissingKeyPolicy>().unwrap(), MissingKeyPolicy::Skip);
        assert!("drop".parse::<MissingKeyPolicy>().is_err());
    }

    #[test]
    fn test_lookup_defaults_validate() {
        let cfg = LookupConfig::new(["id"]);
        assert!(cfg.validate(&schema()).is_ok());
        assert_eq!(cfg.cache.effective_max_size(), DEFAULT_MAX_ROWS);
        assert_eq!(cfg.fetch_permits(), 16);
    }

    #[test]
    fn test_fetch_permits_serialized_without_refresh_ahead() {
        let mut cfg = LookupConfig::new(["id"]);
        cfg.cache.refresh_ahead = false;
        assert_eq!(cfg.fetch_permits(), 1);
    }

    #[test]
    fn test_unknown_key_column_rejected() {
        let cfg = LookupConfig::new(["missing"]);
        let err = cfg.validate(&schema()).unwrap_err();
        assert!(err.to_string().contains("unknown lookup key column: missing"));
    }

    #[test]
    fn test_zero_lru_size_rejected() {
        let mut cfg = LookupConfig::new(["id"]);
        cfg.cache.max_size = Some(0);
        assert!(cfg.validate(&schema()).is_err());
    }

    #[test]
    fn test_max_size_with_all_is_not_an_error() {
        let mut cfg = LookupConfig::new(["id"]);
        cfg.cache.strategy = CacheStrategy::All;
        cfg.cache.max_size = Some(0);
        assert!(cfg.validate(&schema()).is_ok());
    }

    #[test]
    fn test_retry_validation() {
        let retry = RetryConfig {
            backoff_multiplier: 0.5,
            ..RetryConfig::default()
        };
        assert!(retry.validate().is_err());

        let retry = RetryConfig {
            initial_delay: Duration::from_secs(20),
            ..RetryConfig::default()
        };
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_scan_config_validation() {
        assert!(ScanConfig::default().validate().is_ok());
        let cfg = ScanConfig {
            fetch_size: 0,
            ..ScanConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
