use polars::prelude::*;

use crate::columns::{float_values, FloatColumn, SkipReason};

/// Distribution summary of one pollutant column before cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDiagnostics {
    pub column: String,
    pub rows: usize,
    pub zeros: usize,
    pub negatives: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    pub q25: Option<f64>,
    pub q75: Option<f64>,
}

/// Quantile of already sorted values with linear interpolation between closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Summaries for each of `columns` that is present and numeric, in the order given.
pub fn summarize_columns(df: &DataFrame, columns: &[&str]) -> PolarsResult<Vec<ColumnDiagnostics>> {
    let mut summaries = Vec::with_capacity(columns.len());
    for &name in columns {
        let values = match float_values(df, name)? {
            FloatColumn::Values(values) => values,
            FloatColumn::Skipped(SkipReason::AllMissing) => {
                vec![None; df.height()]
            }
            FloatColumn::Skipped(_) => continue,
        };

        let mut present: Vec<f64> = values.iter().flatten().copied().collect();
        present.sort_by(|a, b| a.total_cmp(b));
        let mean = if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        };

        summaries.push(ColumnDiagnostics {
            column: name.to_string(),
            rows: values.len(),
            zeros: present.iter().filter(|v| **v == 0.0).count(),
            negatives: present.iter().filter(|v| **v < 0.0).count(),
            missing: values.len() - present.len(),
            mean,
            q25: quantile(&present, 0.25),
            q75: quantile(&present, 0.75),
        });
    }
    Ok(summaries)
}
