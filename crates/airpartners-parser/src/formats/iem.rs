use csv::ReaderBuilder;
use polars::prelude::*;

use super::common::{parse_optional_f64, parse_timestamp_micros, utc_datetime_series};
use crate::errors::ParserError;

const PARSER: &str = "IEM_ASOS";

pub const IEM_TIMESTAMP_COLUMN: &str = "timestamp_utc";
pub const IEM_WIND_DIR_COLUMN: &str = "wind_dir";
pub const IEM_WIND_SPEED_COLUMN: &str = "wind_speed_mph";

/// Parses the `onlycomma` CSV body returned by the IEM ASOS download service.
///
/// An empty body, a service error body, or a header without rows all produce an empty frame
/// with the regular schema so callers can treat "no observations" uniformly.
pub fn parse_iem_response(content: &str) -> Result<DataFrame, ParserError> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() || trimmed.starts_with("ERROR") {
        return build_frame(Vec::new(), Vec::new(), Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(trimmed.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| ParserError::Csv {
            parser: PARSER,
            source,
        })?
        .clone();

    let position = |name: &str| -> Result<usize, ParserError> {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParserError::MissingColumn {
                parser: PARSER,
                column: name.to_string(),
            })
    };
    let valid_idx = position("valid")?;
    let drct_idx = position("drct")?;
    let sped_idx = position("sped")?;

    let mut timestamps = Vec::new();
    let mut directions = Vec::new();
    let mut speeds = Vec::new();

    for (line_index, record) in reader.records().enumerate() {
        let record = record.map_err(|source| ParserError::Csv {
            parser: PARSER,
            source,
        })?;
        let line_index = line_index + 1;

        let valid = record.get(valid_idx).unwrap_or_default();
        let micros = parse_timestamp_micros(valid).ok_or_else(|| ParserError::DataRow {
            parser: PARSER,
            line_index,
            message: format!("invalid timestamp '{}'", valid.trim()),
        })?;

        timestamps.push(micros);
        directions.push(parse_optional_f64(
            PARSER,
            record.get(drct_idx).unwrap_or_default(),
            line_index,
            "drct",
        )?);
        speeds.push(parse_optional_f64(
            PARSER,
            record.get(sped_idx).unwrap_or_default(),
            line_index,
            "sped",
        )?);
    }

    build_frame(timestamps, directions, speeds)
}

fn build_frame(
    timestamps: Vec<i64>,
    directions: Vec<Option<f64>>,
    speeds: Vec<Option<f64>>,
) -> Result<DataFrame, ParserError> {
    let to_validation = |err: PolarsError| ParserError::Validation {
        parser: PARSER,
        message: format!("failed to build meteorology dataframe: {err}"),
    };

    let ts = utc_datetime_series(IEM_TIMESTAMP_COLUMN, timestamps).map_err(to_validation)?;
    DataFrame::new(vec![
        ts.into(),
        Series::new(IEM_WIND_DIR_COLUMN.into(), directions).into(),
        Series::new(IEM_WIND_SPEED_COLUMN.into(), speeds).into(),
    ])
    .map_err(to_validation)
}
