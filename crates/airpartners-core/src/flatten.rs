use std::collections::HashMap;

use polars::prelude::{Column, DataFrame, NamedFrom, PolarsError, Series};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// A record field holding an object whose keys become top-level columns.
#[derive(Debug, Clone, Copy)]
pub struct NestedField {
    pub field: &'static str,
    pub prefix: Option<&'static str>,
}

impl NestedField {
    pub const fn prefixed(field: &'static str, prefix: &'static str) -> Self {
        Self {
            field,
            prefix: Some(prefix),
        }
    }

    pub const fn unprefixed(field: &'static str) -> Self {
        Self {
            field,
            prefix: None,
        }
    }

    fn column_name(&self, key: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }
}

enum Cell {
    Number(f64),
    Text(String),
}

#[derive(Default)]
struct ColumnBuilder {
    cells: Vec<Option<Cell>>,
}

impl ColumnBuilder {
    fn set(&mut self, row: usize, value: &Value) {
        self.pad_to(row);
        let cell = match value {
            Value::Null => None,
            Value::Number(number) => number.as_f64().map(Cell::Number),
            Value::Bool(flag) => Some(Cell::Number(if *flag { 1.0 } else { 0.0 })),
            Value::String(text) => Some(Cell::Text(text.clone())),
            other => Some(Cell::Text(other.to_string())),
        };
        if self.cells.len() > row {
            self.cells[row] = cell;
        } else {
            self.cells.push(cell);
        }
    }

    fn pad_to(&mut self, len: usize) {
        while self.cells.len() < len {
            self.cells.push(None);
        }
    }

    fn into_column(mut self, name: &str, rows: usize) -> Column {
        self.pad_to(rows);
        let all_numeric = self
            .cells
            .iter()
            .all(|cell| !matches!(cell, Some(Cell::Text(_))));

        if all_numeric {
            let values: Vec<Option<f64>> = self
                .cells
                .iter()
                .map(|cell| match cell {
                    Some(Cell::Number(value)) => Some(*value),
                    _ => None,
                })
                .collect();
            Series::new(name.into(), values).into()
        } else {
            let values: Vec<Option<String>> = self
                .cells
                .into_iter()
                .map(|cell| match cell {
                    Some(Cell::Number(value)) => Some(value.to_string()),
                    Some(Cell::Text(text)) => Some(text),
                    None => None,
                })
                .collect();
            Series::new(name.into(), values).into()
        }
    }
}

/// Converts API records into a flat DataFrame with one row per record.
///
/// Scalar fields map directly to columns. Fields listed in `nested` are expanded so that each
/// of their keys becomes its own column. Columns appear in first-seen order; keys missing from
/// a record are nulls.
pub fn flatten_records(records: &[Value], nested: &[NestedField]) -> Result<DataFrame, FlattenError> {
    let mut order: Vec<String> = Vec::new();
    let mut builders: HashMap<String, ColumnBuilder> = HashMap::new();

    let mut set = |name: String, row: usize, value: &Value| {
        if !builders.contains_key(&name) {
            order.push(name.clone());
        }
        builders.entry(name).or_default().set(row, value);
    };

    for (row, record) in records.iter().enumerate() {
        let object = record
            .as_object()
            .ok_or(FlattenError::NotAnObject { index: row })?;

        for (key, value) in object {
            match nested.iter().find(|field| field.field == key) {
                Some(field) => {
                    if let Value::Object(inner) = value {
                        for (inner_key, inner_value) in inner {
                            set(field.column_name(inner_key), row, inner_value);
                        }
                    }
                }
                None => set(key.clone(), row, value),
            }
        }
    }

    let rows = records.len();
    let columns: Vec<Column> = order
        .iter()
        .filter_map(|name| {
            builders
                .remove(name)
                .map(|builder| builder.into_column(name, rows))
        })
        .collect();

    if columns.is_empty() {
        return Ok(DataFrame::default());
    }
    Ok(DataFrame::new(columns)?)
}
