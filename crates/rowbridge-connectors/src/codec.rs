//! JSON row codec.
//!
//! Maps JSON objects to [`Row`]s using a declared [`TableSchema`]:
//! fields are read by column name and converted to the column's type.
//! Absent fields and JSON `null` decode to [`ScalarValue::Null`].
//!
//! | Type        | JSON                         |
//! |-------------|------------------------------|
//! | `bool`      | boolean                      |
//! | `int64`     | integer                      |
//! | `float64`   | number                       |
//! | `utf8`      | string                       |
//! | `binary`    | lowercase hex string         |
//! | `timestamp` | integer, µs since the epoch  |

use std::fmt::Write as _;

use rowbridge_core::{
    ConnectorError, Result, Row, RowCodec, ScalarType, ScalarValue, TableSchema,
};
use serde_json::{Map, Number, Value};

/// [`RowCodec`] over `serde_json::Value` objects.
#[derive(Debug, Clone)]
pub struct JsonRowCodec {
    schema: TableSchema,
}

impl JsonRowCodec {
    /// Creates a codec for rows of `schema`.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        Self { schema }
    }

    /// The declared schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Decodes a JSON document given as bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Codec`] on malformed JSON or a field that
    /// does not match its column type.
    pub fn decode_slice(&self, bytes: &[u8]) -> Result<Row> {
        let raw: Value = serde_json::from_slice(bytes)
            .map_err(|e| ConnectorError::Codec(format!("invalid JSON row: {e}")))?;
        self.decode(&raw)
    }
}

impl RowCodec for JsonRowCodec {
    type Raw = Value;

    fn decode(&self, raw: &Value) -> Result<Row> {
        let object = raw
            .as_object()
            .ok_or_else(|| ConnectorError::Codec(format!("expected JSON object, got {raw}")))?;
        let mut fields = Vec::with_capacity(self.schema.len());
        for column in self.schema.columns() {
            let value = match object.get(&column.name) {
                None | Some(Value::Null) => ScalarValue::Null,
                Some(v) => decode_value(&column.name, column.scalar_type, v)?,
            };
            fields.push((column.name.clone(), value));
        }
        Ok(Row::new(fields))
    }

    fn encode(&self, row: &Row) -> Result<Value> {
        let mut object = Map::with_capacity(self.schema.len());
        for column in self.schema.columns() {
            let value = match row.get(&column.name) {
                None | Some(ScalarValue::Null) => Value::Null,
                Some(v) => {
                    if v.scalar_type() != Some(column.scalar_type) {
                        return Err(ConnectorError::Codec(format!(
                            "column '{}' is {}, row has {v}",
                            column.name, column.scalar_type
                        )));
                    }
                    encode_value(&column.name, v)?
                }
            };
            object.insert(column.name.clone(), value);
        }
        Ok(Value::Object(object))
    }
}

fn decode_value(column: &str, ty: ScalarType, v: &Value) -> Result<ScalarValue> {
    let decoded = match ty {
        ScalarType::Bool => v.as_bool().map(ScalarValue::Bool),
        ScalarType::Int64 => v.as_i64().map(ScalarValue::Int64),
        ScalarType::Float64 => v.as_f64().map(ScalarValue::Float64),
        ScalarType::Utf8 => v.as_str().map(|s| ScalarValue::Utf8(s.to_string())),
        ScalarType::Binary => v.as_str().and_then(decode_hex).map(ScalarValue::Binary),
        ScalarType::Timestamp => v.as_i64().map(ScalarValue::Timestamp),
    };
    decoded.ok_or_else(|| {
        ConnectorError::Codec(format!("column '{column}' expects {ty}, got {v}"))
    })
}

fn encode_value(column: &str, v: &ScalarValue) -> Result<Value> {
    Ok(match v {
        ScalarValue::Null => Value::Null,
        ScalarValue::Bool(b) => Value::Bool(*b),
        ScalarValue::Int64(n) | ScalarValue::Timestamp(n) => Value::Number((*n).into()),
        ScalarValue::Float64(f) => Number::from_f64(*f).map(Value::Number).ok_or_else(|| {
            ConnectorError::Codec(format!("column '{column}': {f} is not representable in JSON"))
        })?,
        ScalarValue::Utf8(s) => Value::String(s.clone()),
        ScalarValue::Binary(bytes) => Value::String(encode_hex(bytes)),
    })
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}
