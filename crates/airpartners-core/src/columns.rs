use polars::prelude::*;

/// Why a pollutant column was left untouched by a cleaning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not present in the frame.
    Absent,
    /// Present but every value is missing.
    AllMissing,
    /// Present but not numeric.
    NotNumeric,
}

pub(crate) enum FloatColumn {
    Values(Vec<Option<f64>>),
    Skipped(SkipReason),
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Null
    )
}

/// Reads a column as nullable floats, or explains why it cannot be cleaned.
pub(crate) fn float_values(df: &DataFrame, name: &str) -> PolarsResult<FloatColumn> {
    let Some(column) = df.column(name).ok() else {
        return Ok(FloatColumn::Skipped(SkipReason::Absent));
    };
    if !is_numeric(column.dtype()) {
        return Ok(FloatColumn::Skipped(SkipReason::NotNumeric));
    }
    if column.null_count() == column.len() {
        return Ok(FloatColumn::Skipped(SkipReason::AllMissing));
    }

    let cast = column.cast(&DataType::Float64)?;
    let values = cast.f64()?;
    Ok(FloatColumn::Values(
        (0..values.len()).map(|idx| values.get(idx)).collect(),
    ))
}

/// Writes nullable floats back under `name`, replacing the existing column.
pub(crate) fn replace_values(
    df: &mut DataFrame,
    name: &str,
    values: Vec<Option<f64>>,
) -> PolarsResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}
