//! Restore-point tracking for resumable scans.
//!
//! A [`ScanCursor`] is bound to one column of the table schema (resolved
//! by name, recorded by index and type) and remembers the last value it
//! handed out. The next scan resumes strictly after that value.

use std::cmp::Ordering;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};
use crate::store::ScanBound;
use crate::value::{ColumnDef, Row, ScalarType, ScalarValue, TableSchema};

/// Serialized scan position.
///
/// Stored by the host engine as an opaque JSON blob via
/// [`to_bytes`](Self::to_bytes) / [`from_bytes`](Self::from_bytes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    /// Name of the restore column.
    pub restore_column_name: String,
    /// Position of the restore column in the declared schema.
    pub restore_column_index: usize,
    /// Last value handed out; `None` before the first row.
    pub last_emitted_value: Option<ScalarValue>,
    /// Declared type of the restore column.
    pub column_type: ScalarType,
}

impl ScanCheckpoint {
    /// Serializes to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Codec`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ConnectorError::Codec(format!("scan checkpoint: {e}")))
    }

    /// Deserializes from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Codec`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ConnectorError::Codec(format!("scan checkpoint: {e}")))
    }
}

/// Tracks the last emitted restore-column value of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCursor {
    column: ColumnDef,
    last_emitted: Option<ScalarValue>,
}

impl ScanCursor {
    /// Binds a cursor to the named column.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if the schema has no such
    /// column.
    pub fn resolve(schema: &TableSchema, column_name: &str) -> Result<Self> {
        let column = schema.column(column_name).cloned().ok_or_else(|| {
            ConnectorError::config(format!("unknown restore column name: {column_name}"))
        })?;
        Ok(Self {
            column,
            last_emitted: None,
        })
    }

    /// Seeds the cursor from a checkpoint taken by a previous run.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if the checkpoint was taken
    /// for a different column, index or type.
    pub fn seed(&mut self, checkpoint: &ScanCheckpoint) -> Result<()> {
        if checkpoint.restore_column_name != self.column.name
            || checkpoint.restore_column_index != self.column.index
            || checkpoint.column_type != self.column.scalar_type
        {
            return Err(ConnectorError::config(format!(
                "checkpoint restore column {}#{} ({}) does not match {}#{} ({})",
                checkpoint.restore_column_name,
                checkpoint.restore_column_index,
                checkpoint.column_type,
                self.column.name,
                self.column.index,
                self.column.scalar_type,
            )));
        }
        if let Some(value) = &checkpoint.last_emitted_value {
            self.check_type(value)?;
        }
        self.last_emitted.clone_from(&checkpoint.last_emitted_value);
        Ok(())
    }

    /// Exclusive lower bound for the next scan query, if any row has been
    /// emitted.
    #[must_use]
    pub fn bound(&self) -> Option<ScanBound> {
        self.last_emitted.as_ref().map(|value| ScanBound {
            column: self.column.name.clone(),
            value: value.clone(),
        })
    }

    /// Records `row` as emitted.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::Configuration`] if the row lacks the column or
    ///   its value has the wrong type.
    /// - [`ConnectorError::MonotonicityViolation`] if the value is null or
    ///   below the last emitted value.
    pub fn advance(&mut self, row: &Row) -> Result<()> {
        let value = self.value_of(row).ok_or_else(|| {
            ConnectorError::config(format!(
                "row has no value for restore column '{}'",
                self.column.name
            ))
        })?;
        if value.is_null() {
            return Err(self.violation(value));
        }
        self.check_type(value)?;
        if let Some(previous) = &self.last_emitted {
            if previous.compare(value) == Some(Ordering::Greater) {
                return Err(self.violation(value));
            }
        }
        self.last_emitted = Some(value.clone());
        Ok(())
    }

    /// Current position as a checkpoint.
    #[must_use]
    pub fn checkpoint(&self) -> ScanCheckpoint {
        ScanCheckpoint {
            restore_column_name: self.column.name.clone(),
            restore_column_index: self.column.index,
            last_emitted_value: self.last_emitted.clone(),
            column_type: self.column.scalar_type,
        }
    }

    /// Last emitted value.
    #[must_use]
    pub fn last_emitted(&self) -> Option<&ScalarValue> {
        self.last_emitted.as_ref()
    }

    /// The bound column.
    #[must_use]
    pub fn column(&self) -> &ColumnDef {
        &self.column
    }

    fn value_of<'r>(&self, row: &'r Row) -> Option<&'r ScalarValue> {
        row.iter()
            .nth(self.column.index)
            .filter(|(name, _)| *name == self.column.name)
            .map(|(_, value)| value)
            .or_else(|| row.get(&self.column.name))
    }

    fn check_type(&self, value: &ScalarValue) -> Result<()> {
        match value.scalar_type() {
            Some(t) if t == self.column.scalar_type => Ok(()),
            other => Err(ConnectorError::config(format!(
                "restore column '{}' is {}, got {}",
                self.column.name,
                self.column.scalar_type,
                other.map_or_else(|| "NULL".to_string(), |t| t.to_string()),
            ))),
        }
    }

    fn violation(&self, current: &ScalarValue) -> ConnectorError {
        ConnectorError::MonotonicityViolation {
            column: self.column.name.clone(),
            previous: self
                .last_emitted
                .as_ref()
                .map_or_else(|| "<none>".to_string(), ToString::to_string),
            current: current.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new([
            ("id", ScalarType::Int64),
            ("price", ScalarType::Float64),
            ("updated_at", ScalarType::Timestamp),
        ])
    }

    fn row(id: i64, ts: i64) -> Row {
        Row::from_pairs([
            ("id", ScalarValue::Int64(id)),
            ("price", ScalarValue::Float64(1.5)),
            ("updated_at", ScalarValue::Timestamp(ts)),
        ])
    }

    #[test]
    fn test_resolve_records_index_and_type() {
        let cursor = ScanCursor::resolve(&schema(), "updated_at").unwrap();
        assert_eq!(cursor.column().index, 2);
        assert_eq!(cursor.column().scalar_type, ScalarType::Timestamp);
        assert!(cursor.bound().is_none());
    }

    #[test]
    fn test_unknown_column() {
        let err = ScanCursor::resolve(&schema(), "ts").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[RBR-0001] configuration error: unknown restore column name: ts"
        );
    }

    #[test]
    fn test_advance_allows_ties_and_increases() {
        let mut cursor = ScanCursor::resolve(&schema(), "updated_at").unwrap();
        cursor.advance(&row(1, 10)).unwrap();
        cursor.advance(&row(2, 10)).unwrap();
        cursor.advance(&row(3, 20)).unwrap();
        assert_eq!(cursor.last_emitted(), Some(&ScalarValue::Timestamp(20)));
        let bound = cursor.bound().unwrap();
        assert_eq!(bound.column, "updated_at");
        assert_eq!(bound.value, ScalarValue::Timestamp(20));
    }

    #[test]
    fn test_decrease_is_violation() {
        let mut cursor = ScanCursor::resolve(&schema(), "id").unwrap();
        cursor.advance(&row(5, 0)).unwrap();
        let err = cursor.advance(&row(4, 0)).unwrap_err();
        assert_eq!(
            err,
            ConnectorError::MonotonicityViolation {
                column: "id".into(),
                previous: "5".into(),
                current: "4".into(),
            }
        );
        assert_eq!(cursor.last_emitted(), Some(&ScalarValue::Int64(5)));
    }

    #[test]
    fn test_null_is_violation() {
        let mut cursor = ScanCursor::resolve(&schema(), "id").unwrap();
        let r = Row::from_pairs([("id", ScalarValue::Null)]);
        assert!(matches!(
            cursor.advance(&r),
            Err(ConnectorError::MonotonicityViolation { .. })
        ));
    }

    #[test]
    fn test_type_mismatch_is_configuration_error() {
        let mut cursor = ScanCursor::resolve(&schema(), "id").unwrap();
        let r = Row::from_pairs([("id", ScalarValue::Utf8("7".into()))]);
        assert!(matches!(
            cursor.advance(&r),
            Err(ConnectorError::Configuration(_))
        ));
    }

    #[test]
    fn test_value_found_by_name_when_layout_differs() {
        let mut cursor = ScanCursor::resolve(&schema(), "updated_at").unwrap();
        let r = Row::from_pairs([("updated_at", ScalarValue::Timestamp(3))]);
        cursor.advance(&r).unwrap();
        assert_eq!(cursor.last_emitted(), Some(&ScalarValue::Timestamp(3)));
    }

    #[test]
    fn test_checkpoint_bytes_preserve_floats() {
        let mut cursor = ScanCursor::resolve(&schema(), "price").unwrap();
        cursor.advance(&row(1, 0)).unwrap();
        let cp = cursor.checkpoint();
        let restored = ScanCheckpoint::from_bytes(&cp.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, cp);
        assert_eq!(restored.last_emitted_value, Some(ScalarValue::Float64(1.5)));
    }

    #[test]
    fn test_seed_validates_binding() {
        let mut cursor = ScanCursor::resolve(&schema(), "id").unwrap();
        let cp = ScanCheckpoint {
            restore_column_name: "id".into(),
            restore_column_index: 0,
            last_emitted_value: Some(ScalarValue::Int64(2)),
            column_type: ScalarType::Int64,
        };
        cursor.seed(&cp).unwrap();
        assert_eq!(cursor.bound().unwrap().value, ScalarValue::Int64(2));

        let wrong = ScanCheckpoint {
            restore_column_index: 1,
            ..cp
        };
        assert!(cursor.seed(&wrong).is_err());
    }

    #[test]
    fn test_malformed_bytes_are_codec_error() {
        assert!(matches!(
            ScanCheckpoint::from_bytes(b"not json"),
            Err(ConnectorError::Codec(_))
        ));
    }
}
