use polars::prelude::*;

use crate::columns::{float_values, replace_values, FloatColumn, SkipReason};

/// Readings above this are implausible for any clamped pollutant.
pub const CUTOFF_CEILING: f64 = 300.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCutoffs {
    pub column: String,
    /// Negative readings replaced with missing.
    pub negatives_nulled: usize,
    /// Readings above the ceiling replaced with zero (smoothed mode only).
    pub ceiling_zeroed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutoffReport {
    pub columns: Vec<ColumnCutoffs>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl CutoffReport {
    pub fn total_changed(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.negatives_nulled + c.ceiling_zeroed)
            .sum()
    }

    pub fn for_column(&self, name: &str) -> Option<&ColumnCutoffs> {
        self.columns.iter().find(|c| c.column == name)
    }
}

/// Enforces physical bounds on `columns`.
///
/// Negative values become missing. With `smoothed` set, values above [`CUTOFF_CEILING`] become
/// zero; without it the upper bound is not applied at all. Absent, non-numeric and entirely
/// missing columns are left alone and listed in the report.
pub fn apply_cutoffs(
    df: &DataFrame,
    columns: &[&str],
    smoothed: bool,
) -> PolarsResult<(DataFrame, CutoffReport)> {
    let mut output = df.clone();
    let mut report = CutoffReport::default();

    for &name in columns {
        let mut values = match float_values(df, name)? {
            FloatColumn::Values(values) => values,
            FloatColumn::Skipped(reason) => {
                report.skipped.push((name.to_string(), reason));
                continue;
            }
        };

        let mut counts = ColumnCutoffs {
            column: name.to_string(),
            negatives_nulled: 0,
            ceiling_zeroed: 0,
        };
        for slot in values.iter_mut() {
            match *slot {
                Some(value) if value < 0.0 => {
                    *slot = None;
                    counts.negatives_nulled += 1;
                }
                Some(value) if smoothed && value > CUTOFF_CEILING => {
                    *slot = Some(0.0);
                    counts.ceiling_zeroed += 1;
                }
                _ => {}
            }
        }

        replace_values(&mut output, name, values)?;
        report.columns.push(counts);
    }

    Ok((output, report))
}
