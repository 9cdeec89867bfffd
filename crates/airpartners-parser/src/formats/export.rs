use csv::ReaderBuilder;
use polars::prelude::*;

use super::common::RawColumn;
use crate::errors::ParserError;

/// Describes which columns to keep from a sensor export.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// Columns that must be present. When `keep_all` is false these are also the only
    /// columns kept, in this order.
    pub required: &'static [&'static str],
    pub keep_all: bool,
}

impl TableSpec {
    pub const fn only(name: &'static str, required: &'static [&'static str]) -> Self {
        Self {
            name,
            required,
            keep_all: false,
        }
    }

    pub const fn all(name: &'static str, required: &'static [&'static str]) -> Self {
        Self {
            name,
            required,
            keep_all: true,
        }
    }

    /// Applies the same column contract as [`parse_export`] to a frame built elsewhere.
    pub fn select(&self, df: &DataFrame) -> Result<DataFrame, ParserError> {
        for required in self.required {
            if df.column(required).is_err() {
                return Err(ParserError::MissingColumn {
                    parser: self.name,
                    column: (*required).to_string(),
                });
            }
        }
        if self.keep_all {
            return Ok(df.clone());
        }
        df.select(self.required.iter().copied())
            .map_err(|err| ParserError::Validation {
                parser: self.name,
                message: err.to_string(),
            })
    }
}

/// Parses a comma separated sensor export (header row followed by data rows).
pub fn parse_export(content: &str, spec: &TableSpec) -> Result<DataFrame, ParserError> {
    let parser = spec.name;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| ParserError::Csv { parser, source })?
        .clone();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ParserError::EmptyData { parser });
    }

    let header_names: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    for required in spec.required {
        if !header_names.iter().any(|name| name == required) {
            return Err(ParserError::MissingColumn {
                parser,
                column: (*required).to_string(),
            });
        }
    }

    // (position in the csv record, collected cells)
    let mut selected: Vec<(usize, RawColumn)> = if spec.keep_all {
        let mut seen: Vec<&str> = Vec::new();
        let mut columns = Vec::new();
        for (idx, name) in header_names.iter().enumerate() {
            if name.is_empty() || seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            columns.push((idx, RawColumn::new(name.as_str(), 0)));
        }
        columns
    } else {
        spec.required
            .iter()
            .map(|required| {
                let idx = header_names
                    .iter()
                    .position(|name| name == required)
                    .unwrap_or_default();
                (idx, RawColumn::new(*required, 0))
            })
            .collect()
    };

    for (line_index, record) in reader.records().enumerate() {
        let record = record.map_err(|source| ParserError::Csv { parser, source })?;
        if record.len() != header_names.len() {
            return Err(ParserError::DataRow {
                parser,
                line_index: line_index + 1,
                message: format!(
                    "expected {} fields, found {}",
                    header_names.len(),
                    record.len()
                ),
            });
        }
        for (idx, column) in selected.iter_mut() {
            column.push(record.get(*idx).unwrap_or_default());
        }
    }

    let columns: Vec<Column> = selected
        .drain(..)
        .map(|(_, raw)| raw.into_column())
        .collect();

    DataFrame::new(columns).map_err(|err| ParserError::Validation {
        parser,
        message: format!("failed to build dataframe: {err}"),
    })
}
