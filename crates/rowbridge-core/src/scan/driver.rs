//! Bulk scan state machine.
//!
//! ```text
//! NotStarted ──next_batch──► Scanning ──checkpoint──► Checkpointed
//!                               │  ▲                        │
//!                               │  └──────ack_checkpoint────┘
//!                               ├──end of data──► Completed
//!                               └──violation / store failure──► Failed
//! ```
//!
//! The first `next_batch` runs one ordered query bounded by the seeded
//! cursor. Its rows are handed out in batches of `fetch_size`; every batch
//! is validated against the cursor before any of its rows is returned, so
//! a checkpoint never records a value the host did not receive.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{ConnectorError, Result};
use crate::metrics::{ScanMetrics, ScanMetricsSnapshot};
use crate::retry::StoreFetcher;
use crate::scan::cursor::{ScanCheckpoint, ScanCursor};
use crate::store::{QueryRequest, StoreClient};
use crate::value::{Row, TableSchema};

/// Lifecycle of a [`ScanDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Created, optionally seeded, no query issued yet.
    NotStarted,
    /// Handing out batches.
    Scanning,
    /// A checkpoint was taken and awaits acknowledgement.
    Checkpointed,
    /// All rows handed out.
    Completed,
    /// Stopped by an error; the scan must be restarted from a checkpoint.
    Failed,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Scanning => "scanning",
            Self::Checkpointed => "checkpointed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Drives one resumable scan over a [`StoreClient`].
pub struct ScanDriver<S> {
    fetcher: StoreFetcher<S>,
    cursor: Option<ScanCursor>,
    fetch_size: usize,
    state: ScanState,
    buffer: VecDeque<Row>,
    metrics: ScanMetrics,
}

impl<S: StoreClient> ScanDriver<S> {
    /// Creates a driver, resolving the restore column against `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on invalid sizes or an
    /// unknown restore column.
    pub fn new(config: &ScanConfig, schema: &TableSchema, store: Arc<S>) -> Result<Self> {
        config.validate()?;
        let cursor = config
            .restore_column
            .as_deref()
            .map(|name| ScanCursor::resolve(schema, name))
            .transpose()?;
        Ok(Self {
            fetcher: StoreFetcher::new(store, config.retry.clone(), config.timeout, 1),
            cursor,
            fetch_size: config.fetch_size,
            state: ScanState::NotStarted,
            buffer: VecDeque::new(),
            metrics: ScanMetrics::default(),
        })
    }

    /// Seeds the restore point from a previous run's checkpoint.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::InvalidState`] once the scan has started.
    /// - [`ConnectorError::Configuration`] if this scan has no restore
    ///   column or the checkpoint was taken for a different one.
    pub fn restore(&mut self, checkpoint: &ScanCheckpoint) -> Result<()> {
        if self.state != ScanState::NotStarted {
            return Err(ConnectorError::InvalidState(format!(
                "cannot restore a scan in state {}",
                self.state
            )));
        }
        let cursor = self.cursor.as_mut().ok_or_else(|| {
            ConnectorError::config(format!(
                "checkpoint has restore column '{}' but the scan has none configured",
                checkpoint.restore_column_name
            ))
        })?;
        cursor.seed(checkpoint)?;
        info!(
            column = %checkpoint.restore_column_name,
            last_value = ?checkpoint.last_emitted_value,
            "scan restored from checkpoint"
        );
        Ok(())
    }

    /// [`restore`](Self::restore) from serialized checkpoint bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Codec`] on malformed bytes, otherwise as
    /// [`restore`](Self::restore).
    pub fn restore_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let checkpoint = ScanCheckpoint::from_bytes(bytes)?;
        self.restore(&checkpoint)
    }

    /// Next batch of at most `fetch_size` rows; `None` once the scan is
    /// complete.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::InvalidState`] while a checkpoint is pending or
    ///   after a failure.
    /// - [`ConnectorError::SourceUnavailable`] if the scan query fails.
    /// - [`ConnectorError::MonotonicityViolation`] if the restore column
    ///   decreases; no row of the offending batch is returned.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        match self.state {
            ScanState::NotStarted => {
                self.start().await?;
                self.emit()
            }
            ScanState::Scanning => self.emit(),
            ScanState::Completed => Ok(None),
            ScanState::Checkpointed => Err(ConnectorError::InvalidState(
                "next_batch called before the pending checkpoint was acknowledged".to_string(),
            )),
            ScanState::Failed => Err(ConnectorError::InvalidState(
                "next_batch called on a failed scan".to_string(),
            )),
        }
    }

    async fn start(&mut self) -> Result<()> {
        let request = QueryRequest::scan(
            self.cursor.as_ref().map(|c| c.column().name.clone()),
            self.cursor.as_ref().and_then(ScanCursor::bound),
        );
        debug!(
            source = self.fetcher.store().source_name(),
            order_by = ?request.order_by,
            bound = ?request.lower_bound,
            "starting scan"
        );
        match self.fetcher.fetch(&request).await {
            Ok(rows) => {
                info!(
                    source = self.fetcher.store().source_name(),
                    rows = rows.len(),
                    "scan query returned"
                );
                self.buffer = rows.into();
                self.state = ScanState::Scanning;
                Ok(())
            }
            Err(e) => {
                self.state = ScanState::Failed;
                Err(e)
            }
        }
    }

    fn emit(&mut self) -> Result<Option<Vec<Row>>> {
        if self.buffer.is_empty() {
            self.state = ScanState::Completed;
            info!(
                source = self.fetcher.store().source_name(),
                "scan completed"
            );
            return Ok(None);
        }

        let n = self.fetch_size.min(self.buffer.len());
        if let Some(cursor) = &self.cursor {
            let mut probe = cursor.clone();
            for row in self.buffer.iter().take(n) {
                if let Err(e) = probe.advance(row) {
                    self.state = ScanState::Failed;
                    warn!(error = %e, "scan stopped");
                    return Err(e);
                }
            }
            self.cursor = Some(probe);
        }

        let batch: Vec<Row> = self.buffer.drain(..n).collect();
        self.metrics.record_batch(batch.len() as u64);
        Ok(Some(batch))
    }

    /// Captures the current position.
    ///
    /// From `Scanning` this moves to `Checkpointed` until
    /// [`ack_checkpoint`](Self::ack_checkpoint). Before the first batch and
    /// after completion the position is returned without a state change.
    /// Returns `None` when the scan has no restore column.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidState`] while another checkpoint is
    /// pending or after a failure.
    pub fn checkpoint(&mut self) -> Result<Option<ScanCheckpoint>> {
        match self.state {
            ScanState::Scanning => self.state = ScanState::Checkpointed,
            ScanState::NotStarted | ScanState::Completed => {}
            ScanState::Checkpointed | ScanState::Failed => {
                return Err(ConnectorError::InvalidState(format!(
                    "cannot checkpoint a scan in state {}",
                    self.state
                )));
            }
        }
        self.metrics.record_checkpoint();
        Ok(self.cursor.as_ref().map(ScanCursor::checkpoint))
    }

    /// Resumes scanning after a checkpoint was persisted.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidState`] unless a checkpoint is
    /// pending.
    pub fn ack_checkpoint(&mut self) -> Result<()> {
        if self.state != ScanState::Checkpointed {
            return Err(ConnectorError::InvalidState(format!(
                "no pending checkpoint in state {}",
                self.state
            )));
        }
        self.state = ScanState::Scanning;
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// The restore cursor, if a restore column is configured.
    #[must_use]
    pub fn cursor(&self) -> Option<&ScanCursor> {
        self.cursor.as_ref()
    }

    /// Snapshot of the scan counters.
    #[must_use]
    pub fn metrics(&self) -> ScanMetricsSnapshot {
        self.metrics.snapshot(self.fetcher.retry_count())
    }
}

impl<S: StoreClient> std::fmt::Debug for ScanDriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDriver")
            .field("source", &self.fetcher.store().source_name())
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::testing::InMemoryStore;
    use crate::value::{ScalarType, ScalarValue};

    fn schema() -> TableSchema {
        TableSchema::new([("id", ScalarType::Int64), ("v", ScalarType::Utf8)])
    }

    fn row(id: i64) -> Row {
        Row::from_pairs([("id", ScalarValue::Int64(id)), ("v", "x".into())])
    }

    fn config(fetch_size: usize) -> ScanConfig {
        ScanConfig {
            restore_column: Some("id".into()),
            fetch_size,
            retry: RetryConfig::none(),
            ..ScanConfig::default()
        }
    }

    #[tokio::test]
    async fn test_batches_then_complete() {
        let store = Arc::new(InMemoryStore::new((1..=5).map(row).collect()));
        let mut driver = ScanDriver::new(&config(2), &schema(), store).unwrap();
        assert_eq!(driver.state(), ScanState::NotStarted);

        let sizes: Vec<usize> = [
            driver.next_batch().await.unwrap().unwrap().len(),
            driver.next_batch().await.unwrap().unwrap().len(),
            driver.next_batch().await.unwrap().unwrap().len(),
        ]
        .to_vec();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(driver.next_batch().await.unwrap().is_none());
        assert_eq!(driver.state(), ScanState::Completed);
        assert!(driver.next_batch().await.unwrap().is_none());

        let m = driver.metrics();
        assert_eq!(m.batches, 3);
        assert_eq!(m.rows, 5);
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_until_ack() {
        let store = Arc::new(InMemoryStore::new((1..=3).map(row).collect()));
        let mut driver = ScanDriver::new(&config(1), &schema(), store).unwrap();
        driver.next_batch().await.unwrap();

        let cp = driver.checkpoint().unwrap().unwrap();
        assert_eq!(cp.last_emitted_value, Some(ScalarValue::Int64(1)));
        assert_eq!(driver.state(), ScanState::Checkpointed);
        assert!(matches!(
            driver.next_batch().await,
            Err(ConnectorError::InvalidState(_))
        ));
        assert!(driver.checkpoint().is_err());

        driver.ack_checkpoint().unwrap();
        assert_eq!(driver.state(), ScanState::Scanning);
        assert!(driver.ack_checkpoint().is_err());
    }

    #[tokio::test]
    async fn test_restore_after_start_is_invalid() {
        let store = Arc::new(InMemoryStore::new(vec![row(1)]));
        let mut driver = ScanDriver::new(&config(10), &schema(), store).unwrap();
        let cp = driver.checkpoint().unwrap().unwrap();
        assert_eq!(driver.state(), ScanState::NotStarted);
        driver.next_batch().await.unwrap();
        assert!(matches!(
            driver.restore(&cp),
            Err(ConnectorError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_without_restore_column() {
        let store = Arc::new(InMemoryStore::new(vec![row(2), row(1)]));
        let cfg = ScanConfig {
            retry: RetryConfig::none(),
            ..ScanConfig::default()
        };
        let mut driver = ScanDriver::new(&cfg, &schema(), store).unwrap();
        let batch = driver.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(driver.checkpoint().unwrap().is_none());
        assert!(driver.cursor().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_moves_to_failed() {
        let store = Arc::new(InMemoryStore::new(vec![row(1)]));
        store.set_fatal(true);
        let mut driver = ScanDriver::new(&config(10), &schema(), store).unwrap();
        assert!(matches!(
            driver.next_batch().await,
            Err(ConnectorError::SourceUnavailable { .. })
        ));
        assert_eq!(driver.state(), ScanState::Failed);
        assert!(matches!(
            driver.next_batch().await,
            Err(ConnectorError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(InMemoryStore::new(vec![row(1)]));
        store.fail_next(1);
        let cfg = ScanConfig {
            retry: RetryConfig::default(),
            ..config(10)
        };
        let mut driver = ScanDriver::new(&cfg, &schema(), Arc::clone(&store)).unwrap();
        assert_eq!(driver.next_batch().await.unwrap().unwrap().len(), 1);
        assert_eq!(driver.metrics().retries, 1);
    }

    #[test]
    fn test_unknown_restore_column() {
        let store = Arc::new(InMemoryStore::new(Vec::new()));
        let cfg = ScanConfig {
            restore_column: Some("ts".into()),
            ..ScanConfig::default()
        };
        let err = ScanDriver::new(&cfg, &schema(), store).unwrap_err();
        assert_eq!(
            err.to_string(),
            "[RBR-0001] configuration error: unknown restore column name: ts"
        );
    }
}
