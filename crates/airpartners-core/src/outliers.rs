use polars::prelude::*;

use crate::columns::{float_values, replace_values, FloatColumn, SkipReason};

/// Multiples of the column standard deviation a reading must clear above both neighbours.
pub const SPIKE_SIGMA: f64 = 3.0;

/// Sample standard deviation (n - 1 denominator) of the present values.
///
/// `None` with fewer than two present values.
pub fn sample_std(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.len() < 2 {
        return None;
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Marks every reading that sits at least `SPIKE_SIGMA * stddev` above both neighbours.
///
/// Rows missing either neighbour, including the first and last rows, are never marked. The
/// mask is computed from the values as given; nothing is removed while scanning. A flat
/// series (zero deviation) has no spikes.
pub fn spike_mask(values: &[Option<f64>], stddev: f64) -> Vec<bool> {
    let mut mask = vec![false; values.len()];
    if values.len() < 3 || stddev <= 0.0 || !stddev.is_finite() {
        return mask;
    }

    for idx in 1..values.len() - 1 {
        let (Some(prev), Some(current), Some(next)) =
            (values[idx - 1], values[idx], values[idx + 1])
        else {
            continue;
        };
        let threshold = current - SPIKE_SIGMA * stddev;
        if prev <= threshold && next <= threshold {
            mask[idx] = true;
        }
    }
    mask
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpikes {
    pub column: String,
    pub flagged: usize,
    /// Scans needed before no further spike remained.
    pub passes: usize,
    /// Standard deviation used on the final scan.
    pub stddev: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeReport {
    pub columns: Vec<ColumnSpikes>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl SpikeReport {
    pub fn total_flagged(&self) -> usize {
        self.columns.iter().map(|c| c.flagged).sum()
    }

    pub fn for_column(&self, name: &str) -> Option<&ColumnSpikes> {
        self.columns.iter().find(|c| c.column == name)
    }
}

/// Replaces isolated spikes with missing values, one column at a time.
///
/// Each column is rescanned (with its standard deviation recomputed) until a scan marks
/// nothing, so running this on its own output changes nothing.
pub fn flag_spikes(df: &DataFrame, columns: &[&str]) -> PolarsResult<(DataFrame, SpikeReport)> {
    let mut output = df.clone();
    let mut report = SpikeReport::default();

    for &name in columns {
        let mut values = match float_values(df, name)? {
            FloatColumn::Values(values) => values,
            FloatColumn::Skipped(reason) => {
                report.skipped.push((name.to_string(), reason));
                continue;
            }
        };

        let mut spikes = ColumnSpikes {
            column: name.to_string(),
            flagged: 0,
            passes: 0,
            stddev: 0.0,
        };
        while let Some(stddev) = sample_std(&values) {
            spikes.passes += 1;
            spikes.stddev = stddev;
            let mask = spike_mask(&values, stddev);
            let mut marked = 0;
            for (slot, _) in values.iter_mut().zip(&mask).filter(|(_, hit)| **hit) {
                *slot = None;
                marked += 1;
            }
            if marked == 0 {
                break;
            }
            spikes.flagged += marked;
        }

        if spikes.flagged > 0 {
            replace_values(&mut output, name, values)?;
        }
        report.columns.push(spikes);
    }

    Ok((output, report))
}
