//! Values, rows, lookup keys and table schemas.
//!
//! [`ScalarValue`] covers the column types a relational store hands back
//! and that can be used as lookup keys or restore-column bounds. It is
//! hashable (floats by bit pattern) so it can sit inside a [`LookupKey`],
//! and ordered within a single type so restore columns can be compared.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

/// A single column value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer (covers smallint/int/bigint)
    Int64(i64),
    /// 64-bit float (covers real/double)
    Float64(f64),
    /// UTF-8 string
    Utf8(String),
    /// Raw binary data
    Binary(Vec<u8>),
    /// Timestamp as microseconds since Unix epoch
    Timestamp(i64),
}

/// Type tag of a non-null [`ScalarValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int64,
    /// 64-bit float
    Float64,
    /// UTF-8 string
    Utf8,
    /// Raw binary data
    Binary,
    /// Microsecond timestamp
    Timestamp,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
            Self::Binary => "binary",
            Self::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

impl ScalarValue {
    /// The value's type, `None` for `Null`.
    #[must_use]
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ScalarType::Bool),
            Self::Int64(_) => Some(ScalarType::Int64),
            Self::Float64(_) => Some(ScalarType::Float64),
            Self::Utf8(_) => Some(ScalarType::Utf8),
            Self::Binary(_) => Some(ScalarType::Binary),
            Self::Timestamp(_) => Some(ScalarType::Timestamp),
        }
    }

    /// Returns `true` for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Order two values of the same type.
    ///
    /// Returns `None` when either side is `Null` or the types differ.
    /// Floats use IEEE total ordering.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => {
                Some(a.cmp(b))
            }
            (Self::Float64(a), Self::Float64(b)) => Some(a.total_cmp(b)),
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) | (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Binary(a), Self::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `eq`: floats hash by bit pattern.
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) | Self::Timestamp(v) => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Binary(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Binary(v) => write!(f, "X'{}'", hex_encode(v)),
            Self::Timestamp(us) => write!(f, "TIMESTAMP '{us}'"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

/// Encode bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

/// An immutable record keyed by column name.
///
/// Cloning is an `Arc` bump; rows handed out by caches are shared with
/// the cache entry that holds them.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    fields: Arc<[(String, ScalarValue)]>,
}

impl Row {
    /// Build a row from `(column, value)` pairs in column order.
    #[must_use]
    pub fn new(fields: Vec<(String, ScalarValue)>) -> Self {
        Self {
            fields: fields.into(),
        }
    }

    /// Build a row from anything convertible into column names and values.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<ScalarValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Value of the named column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Value at a column position.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<&ScalarValue> {
        self.fields.get(index).map(|(_, v)| v)
    }

    /// Iterate `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Shared, immutable result of a lookup: zero, one or many rows.
pub type RowSet = Arc<[Row]>;

/// An ordered tuple of key values probing the store.
///
/// Column names are shared between all keys of one executor; equality
/// and hashing are driven by the values.
#[derive(Debug, Clone)]
pub struct LookupKey {
    columns: Arc<[String]>,
    values: Box<[ScalarValue]>,
}

impl LookupKey {
    /// Build a key, checking that one value is given per key column.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] on arity mismatch.
    pub fn new(columns: Arc<[String]>, values: Vec<ScalarValue>) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(ConnectorError::Configuration(format!(
                "lookup key arity mismatch: expected {} value(s) for ({}), got {}",
                columns.len(),
                columns.join(", "),
                values.len()
            )));
        }
        Ok(Self {
            columns,
            values: values.into_boxed_slice(),
        })
    }

    /// Extract the key columns of a row.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if the row lacks a key column.
    pub fn from_row(columns: &Arc<[String]>, row: &Row) -> Result<Self> {
        let values = columns
            .iter()
            .map(|c| {
                row.get(c).cloned().ok_or_else(|| {
                    ConnectorError::Configuration(format!(
                        "row has no value for key column '{c}'"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(Arc::clone(columns), values)
    }

    /// Key column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Key values, aligned with [`columns`](Self::columns).
    #[must_use]
    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Whether `row` carries exactly this key.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.iter().all(|(c, v)| row.get(c) == Some(v))
    }
}

impl PartialEq for LookupKey {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
            && (Arc::ptr_eq(&self.columns, &other.columns) || self.columns == other.columns)
    }
}

impl Eq for LookupKey {}

impl Hash for LookupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (c, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}={v}")?;
        }
        f.write_str(")")
    }
}

/// A declared table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Zero-based position in the declared column list.
    pub index: usize,
    /// Declared type.
    pub scalar_type: ScalarType,
}

/// Ordered column list of the backing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Build a schema; indices follow declaration order.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = (S, ScalarType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .enumerate()
                .map(|(index, (name, scalar_type))| ColumnDef {
                    name: name.into(),
                    index,
                    scalar_type,
                })
                .collect(),
        }
    }

    /// Column with the given name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column at the given position.
    #[must_use]
    pub fn column_at(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    /// All columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether no columns are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of<T: Hash>(v: &T) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_scalar_value_display() {
        assert_eq!(ScalarValue::Null.to_string(), "NULL");
        assert_eq!(ScalarValue::Int64(42).to_string(), "42");
        assert_eq!(ScalarValue::Utf8("hello".into()).to_string(), "'hello'");
        assert_eq!(ScalarValue::Binary(vec![0xDE, 0xAD]).to_string(), "X'dead'");
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        let a = ScalarValue::Float64(f64::NAN);
        assert_eq!(a, a.clone());
        assert_eq!(hash_of(&a), hash_of(&a.clone()));
        assert_ne!(ScalarValue::Float64(0.0), ScalarValue::Float64(-0.0));
    }

    #[test]
    fn test_compare_same_type_only() {
        let one = ScalarValue::Int64(1);
        let two = ScalarValue::Int64(2);
        assert_eq!(one.compare(&two), Some(Ordering::Less));
        assert_eq!(one.compare(&ScalarValue::Timestamp(1)), None);
        assert_eq!(one.compare(&ScalarValue::Null), None);
        assert_eq!(
            ScalarValue::Utf8("b".into()).compare(&ScalarValue::Utf8("a".into())),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_row_access() {
        let row = Row::from_pairs([("id", ScalarValue::Int64(7)), ("name", "alice".into())]);
        assert_eq!(row.get("id"), Some(&ScalarValue::Int64(7)));
        assert_eq!(row.value_at(1), Some(&ScalarValue::Utf8("alice".into())));
        assert!(row.get("missing").is_none());
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_lookup_key_arity() {
        let cols: Arc<[String]> = vec!["a".to_string(), "b".to_string()].into();
        let err = LookupKey::new(Arc::clone(&cols), vec![ScalarValue::Int64(1)]).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration(_)));
        assert!(LookupKey::new(cols, vec![ScalarValue::Int64(1), ScalarValue::Int64(2)]).is_ok());
    }

    #[test]
    fn test_lookup_key_from_row_and_match() {
        let cols: Arc<[String]> = vec!["id".to_string()].into();
        let row = Row::from_pairs([("id", ScalarValue::Int64(3)), ("v", "x".into())]);
        let key = LookupKey::from_row(&cols, &row).unwrap();
        assert!(key.matches(&row));
        assert_eq!(key.to_string(), "(id=3)");

        let other: Arc<[String]> = vec!["missing".to_string()].into();
        assert!(LookupKey::from_row(&other, &row).is_err());
    }

    #[test]
    fn test_lookup_key_hash_eq() {
        let cols: Arc<[String]> = vec!["id".to_string()].into();
        let a = LookupKey::new(Arc::clone(&cols), vec![ScalarValue::Int64(5)]).unwrap();
        let b = LookupKey::new(cols, vec![ScalarValue::Int64(5)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_schema_indices_follow_declaration() {
        let schema = TableSchema::new([
            ("id", ScalarType::Int64),
            ("name", ScalarType::Utf8),
            ("updated_at", ScalarType::Timestamp),
        ]);
        assert_eq!(schema.column("updated_at").unwrap().index, 2);
        assert_eq!(schema.column_at(1).unwrap().name, "name");
        assert!(schema.column("nope").is_none());
        assert_eq!(schema.field_names(), vec!["id", "name", "updated_at"]);
    }
}
