//! Lookup key resolution.
//!
//! Host engines describe join keys as field paths into the table schema.
//! Only top-level columns can be pushed down as equality filters, so every
//! path must have exactly one element.

use crate::error::{ConnectorError, Result};
use crate::value::TableSchema;

/// Resolves key field paths to column names.
///
/// # Errors
///
/// Returns [`ConnectorError::Configuration`] if a path is nested or
/// empty, or points past the end of the schema.
pub fn resolve_key_columns(schema: &TableSchema, key_paths: &[Vec<usize>]) -> Result<Vec<String>> {
    if key_paths.is_empty() {
        return Err(ConnectorError::config("no lookup key columns configured"));
    }
    key_paths
        .iter()
        .map(|path| {
            let [index] = path.as_slice() else {
                return Err(ConnectorError::config(
                    "only non-nested lookup keys are supported",
                ));
            };
            schema
                .column_at(*index)
                .map(|c| c.name.clone())
                .ok_or_else(|| {
                    ConnectorError::config(format!(
                        "lookup key index {index} out of range for {} column(s)",
                        schema.len()
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarType;

    fn schema() -> TableSchema {
        TableSchema::new([
            ("id", ScalarType::Int64),
            ("region", ScalarType::Utf8),
            ("name", ScalarType::Utf8),
        ])
    }

    #[test]
    fn test_flat_paths_resolve_in_order() {
        let cols = resolve_key_columns(&schema(), &[vec![1], vec![0]]).unwrap();
        assert_eq!(cols, vec!["region", "id"]);
    }

    #[test]
    fn test_nested_path_rejected() {
        let err = resolve_key_columns(&schema(), &[vec![0, 1]]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "[RBR-0001] configuration error: only non-nested lookup keys are supported"
        );
        assert!(resolve_key_columns(&schema(), &[vec![]]).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = resolve_key_columns(&schema(), &[vec![7]]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_empty_key_list_rejected() {
        assert!(resolve_key_columns(&schema(), &[]).is_err());
    }
}
