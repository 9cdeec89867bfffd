use airpartners_parser::{parse_timestamp_micros, parse_wall_clock_micros};
use polars::prelude::*;
use thiserror::Error;

use crate::types::LocalTimestamp;

pub const RAW_TIMESTAMP: &str = "timestamp";
pub const TIMESTAMP_UTC: &str = "timestamp_utc";
pub const TIMESTAMP_LOCAL: &str = "timestamp_local";

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("required column '{0}' is missing")]
    MissingColumn(&'static str),
    #[error("column '{column}' row {row} holds an unreadable timestamp '{value}'")]
    InvalidTimestamp {
        column: &'static str,
        row: usize,
        value: String,
    },
}

/// Rows removed by [`deduplicate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    /// Removed rows that were exact copies of the row kept for their instant.
    pub identical: usize,
    /// Removed rows that shared an instant with a kept row but differed elsewhere.
    pub conflicting: usize,
}

impl DedupReport {
    pub fn removed(&self) -> usize {
        self.identical + self.conflicting
    }
}

fn utc_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, Some(polars::prelude::TimeZone::UTC))
}

fn naive_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, None)
}

fn parse_column(
    df: &DataFrame,
    name: &'static str,
    parse: fn(&str) -> Option<i64>,
    dtype: DataType,
) -> Result<Series, TimestampError> {
    let column = df.column(name)?;
    if let DataType::Datetime(_, _) = column.dtype() {
        return Ok(column.as_materialized_series().cast(&dtype)?);
    }

    let text = column.str()?;
    let mut micros: Vec<Option<i64>> = Vec::with_capacity(text.len());
    for (row, value) in text.into_iter().enumerate() {
        match value {
            None => micros.push(None),
            Some(raw) => match parse(raw) {
                Some(parsed) => micros.push(Some(parsed)),
                None => {
                    return Err(TimestampError::InvalidTimestamp {
                        column: name,
                        row,
                        value: raw.to_string(),
                    })
                }
            },
        }
    }
    Ok(Series::new(name.into(), micros).cast(&dtype)?)
}

/// Replaces the textual `timestamp` column with a UTC-typed `timestamp_utc` and converts
/// `timestamp_local` to a naive wall-clock datetime, then sorts ascending by `timestamp_utc`.
///
/// Rows whose UTC timestamp is blank cannot be placed in time and are dropped.
pub fn normalize_timestamps(
    df: &DataFrame,
    local: LocalTimestamp,
) -> Result<DataFrame, TimestampError> {
    let has_raw = df.get_column_names().iter().any(|c| c.as_str() == RAW_TIMESTAMP);
    let has_utc = df.get_column_names().iter().any(|c| c.as_str() == TIMESTAMP_UTC);
    let has_local = df.get_column_names().iter().any(|c| c.as_str() == TIMESTAMP_LOCAL);

    let utc = match (has_raw, has_utc) {
        (true, _) => parse_column(df, RAW_TIMESTAMP, parse_timestamp_micros, utc_dtype())?
            .with_name(TIMESTAMP_UTC.into()),
        (false, true) => parse_column(df, TIMESTAMP_UTC, parse_timestamp_micros, utc_dtype())?,
        (false, false) => return Err(TimestampError::MissingColumn(RAW_TIMESTAMP)),
    };

    let local_series = match (has_local, local) {
        (true, _) => Some(parse_column(
            df,
            TIMESTAMP_LOCAL,
            parse_wall_clock_micros,
            naive_dtype(),
        )?),
        (false, LocalTimestamp::Required) => {
            return Err(TimestampError::MissingColumn(TIMESTAMP_LOCAL))
        }
        (false, LocalTimestamp::IfPresent) => None,
    };

    let mut columns: Vec<Column> = Vec::with_capacity(df.width() + 1);
    columns.push(utc.clone().into());
    if let Some(series) = local_series {
        columns.push(series.into());
    }
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == RAW_TIMESTAMP || name == TIMESTAMP_UTC || name == TIMESTAMP_LOCAL {
            continue;
        }
        columns.push(column.clone());
    }

    let mut normalized = DataFrame::new(columns)?;
    if utc.null_count() > 0 {
        let keep = utc.is_not_null();
        normalized = normalized.filter(&keep)?;
    }

    Ok(normalized.sort(
        [TIMESTAMP_UTC],
        SortMultipleOptions::default().with_maintain_order(true),
    )?)
}

/// Keeps the first row of every run of equal `timestamp_utc` values.
///
/// Expects a frame already sorted by [`normalize_timestamps`]. Afterwards `timestamp_utc` is
/// strictly increasing.
pub fn deduplicate(df: &DataFrame) -> Result<(DataFrame, DedupReport), TimestampError> {
    let len = df.height();
    let timestamps = df.column(TIMESTAMP_UTC)?.datetime()?;

    let mut keep = vec![true; len];
    let mut report = DedupReport::default();
    let mut kept_idx: Option<(usize, i64)> = None;

    for (idx, slot) in keep.iter_mut().enumerate() {
        let Some(ts) = timestamps.get(idx) else {
            continue;
        };
        match kept_idx {
            Some((first, previous)) if previous == ts => {
                *slot = false;
                if rows_equal(df, first, idx)? {
                    report.identical += 1;
                } else {
                    report.conflicting += 1;
                }
            }
            _ => kept_idx = Some((idx, ts)),
        }
    }

    if report.removed() == 0 {
        return Ok((df.clone(), report));
    }

    let mask = BooleanChunked::from_slice("keep".into(), &keep);
    Ok((df.filter(&mask)?, report))
}

fn rows_equal(df: &DataFrame, left: usize, right: usize) -> Result<bool, TimestampError> {
    for column in df.get_columns() {
        if column.get(left)? != column.get(right)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether `timestamp_utc` has no nulls and strictly increases row to row.
pub fn is_strictly_increasing(df: &DataFrame) -> Result<bool, TimestampError> {
    let timestamps = df.column(TIMESTAMP_UTC)?.datetime()?;
    let mut previous: Option<i64> = None;
    for idx in 0..df.height() {
        let Some(ts) = timestamps.get(idx) else {
            return Ok(false);
        };
        if previous.is_some_and(|prev| prev >= ts) {
            return Ok(false);
        }
        previous = Some(ts);
    }
    Ok(true)
}

/// First and last `timestamp_utc` instants as microseconds, if the frame has any rows.
pub fn bounds_micros(df: &DataFrame) -> Result<Option<(i64, i64)>, TimestampError> {
    let timestamps = df.column(TIMESTAMP_UTC)?.datetime()?;
    let mut bounds: Option<(i64, i64)> = None;
    for ts in (0..df.height()).filter_map(|idx| timestamps.get(idx)) {
        bounds = Some(match bounds {
            None => (ts, ts),
            Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
        });
    }
    Ok(bounds)
}
