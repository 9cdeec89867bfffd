use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;

use crate::errors::ParserError;

/// Column names that always stay text, regardless of their contents.
const TEXT_COLUMNS: &[&str] = &["timestamp", "timestamp_local", "url", "sn", "valid", "station"];

const MISSING_TOKENS: &[&str] = &["", "nan", "na", "none", "null", "m"];

pub(crate) fn is_missing_token(value: &str) -> bool {
    let trimmed = value.trim();
    MISSING_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

pub(crate) fn is_text_column(name: &str) -> bool {
    TEXT_COLUMNS.contains(&name) || name.ends_with("_model_id")
}

/// Parses a timestamp string into microseconds since the Unix epoch.
///
/// Offset-aware values (RFC 3339 or `+HH:MM` suffixed) are converted to UTC. Naive values are
/// read field by field as if they were UTC wall-clock time, which is also how the sensor
/// exports spell their "local" timestamps.
pub fn parse_timestamp_micros(value: &str) -> Option<i64> {
    static OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"];
    static NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_micros());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.timestamp_micros());
        }
    }
    let naive = trimmed.trim_end_matches(['Z', 'z']);
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    None
}

/// Parses a timestamp string keeping its wall-clock fields exactly as written.
///
/// Any offset or `Z` suffix is ignored, so `2021-03-01T07:00:00Z` and
/// `2021-03-01T07:00:00-05:00` both yield 07:00 on that date. The result is expressed as
/// microseconds of that naive wall-clock reading.
pub fn parse_wall_clock_micros(value: &str) -> Option<i64> {
    static OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"];

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_local().and_utc().timestamp_micros());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.naive_local().and_utc().timestamp_micros());
        }
    }
    parse_timestamp_micros(trimmed)
}

/// Raw cells collected for one column before its type is decided.
pub(crate) struct RawColumn {
    pub name: String,
    pub cells: Vec<Option<String>>,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            cells: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: &str) {
        if is_missing_token(value) {
            self.cells.push(None);
        } else {
            self.cells.push(Some(value.trim().to_string()));
        }
    }

    /// Numeric when every present cell parses as a float, text otherwise.
    pub fn into_column(self) -> Column {
        if !is_text_column(&self.name) {
            let parsed: Option<Vec<Option<f64>>> = self
                .cells
                .iter()
                .map(|cell| match cell {
                    None => Some(None),
                    Some(text) => text.parse::<f64>().ok().map(Some),
                })
                .collect();
            if let Some(values) = parsed {
                return Series::new(self.name.as_str().into(), values).into();
            }
        }

        let text: Vec<Option<&str>> = self.cells.iter().map(|cell| cell.as_deref()).collect();
        Series::new(self.name.as_str().into(), text).into()
    }
}

pub(crate) fn parse_optional_f64(
    parser: &'static str,
    value: &str,
    line_index: usize,
    column: &str,
) -> Result<Option<f64>, ParserError> {
    if is_missing_token(value) {
        return Ok(None);
    }

    value
        .trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|err| ParserError::DataRow {
            parser,
            line_index,
            message: format!("failed to parse column '{column}' as float: {err}"),
        })
}

pub(crate) fn utc_datetime_series(name: &str, micros: Vec<i64>) -> PolarsResult<Series> {
    Series::new(name.into(), micros).cast(&DataType::Datetime(
        TimeUnit::Microseconds,
        Some(polars::prelude::TimeZone::UTC),
    ))
}
