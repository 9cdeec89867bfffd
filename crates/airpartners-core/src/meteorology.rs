use std::collections::HashSet;

use airpartners_parser::{IEM_TIMESTAMP_COLUMN, IEM_WIND_DIR_COLUMN, IEM_WIND_SPEED_COLUMN};
use polars::prelude::*;

use crate::timestamps::TIMESTAMP_UTC;
use crate::types::{WindCoverage, WindHandling};

pub const WIND_DIR: &str = "wind_dir";
pub const WIND_SPEED: &str = "wind_speed";

/// Statute miles per hour to metres per second.
pub const MPH_TO_MPS: f64 = 1609.0 / 3600.0;

const MINUTE_MICROS: i64 = 60 * 1_000_000;

/// Rounds an instant to the nearest whole minute, ties to the even minute.
pub fn round_to_minute(micros: i64) -> i64 {
    let floor = micros.div_euclid(MINUTE_MICROS) * MINUTE_MICROS;
    let remainder = micros - floor;
    let half = MINUTE_MICROS / 2;
    let odd_floor = (floor / MINUTE_MICROS).rem_euclid(2) == 1;
    if remainder > half || (remainder == half && odd_floor) {
        floor + MINUTE_MICROS
    } else {
        floor
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindSample {
    pub minute_micros: i64,
    pub direction_deg: Option<f64>,
    pub speed_mph: Option<f64>,
}

/// Rounds meteorology rows to the minute and drops repeated minutes, keeping the first row
/// seen for each. Returned samples are sorted by minute; the second value counts the drops.
pub fn prepare_samples(meteorology: &DataFrame) -> PolarsResult<(Vec<WindSample>, usize)> {
    if meteorology.height() == 0 {
        return Ok((Vec::new(), 0));
    }

    let timestamps = meteorology.column(IEM_TIMESTAMP_COLUMN)?.cast(&DataType::Datetime(
        TimeUnit::Microseconds,
        Some(polars::prelude::TimeZone::UTC),
    ))?;
    let timestamps = timestamps.datetime()?;
    let directions = meteorology.column(IEM_WIND_DIR_COLUMN)?.cast(&DataType::Float64)?;
    let directions = directions.f64()?;
    let speeds = meteorology.column(IEM_WIND_SPEED_COLUMN)?.cast(&DataType::Float64)?;
    let speeds = speeds.f64()?;

    let mut seen = HashSet::new();
    let mut duplicates = 0;
    let mut samples = Vec::with_capacity(meteorology.height());
    for idx in 0..meteorology.height() {
        let Some(ts) = timestamps.get(idx) else {
            continue;
        };
        let minute = round_to_minute(ts);
        if !seen.insert(minute) {
            duplicates += 1;
            continue;
        }
        samples.push(WindSample {
            minute_micros: minute,
            direction_deg: directions.get(idx),
            speed_mph: speeds.get(idx),
        });
    }
    samples.sort_by_key(|sample| sample.minute_micros);
    Ok((samples, duplicates))
}

/// Wind at calendar minute `at` for a calendar ending at `end`: the latest sample at or
/// before `at`, or when that is absent or missing the value, the next sample up to `end`
/// that has one.
fn value_at(
    samples: &[WindSample],
    at: i64,
    end: i64,
    field: fn(&WindSample) -> Option<f64>,
) -> Option<f64> {
    let known = samples.partition_point(|sample| sample.minute_micros <= at);
    samples[known.saturating_sub(1)..]
        .iter()
        .take_while(|sample| sample.minute_micros <= end)
        .find_map(field)
}

/// Calendar minutes from `start` that come before the first sample.
fn leading_minutes(samples: &[WindSample], start_micros: i64, slots: usize) -> usize {
    match samples.first() {
        None => slots,
        Some(first) if first.minute_micros <= start_micros => 0,
        Some(first) => {
            let gap = first.minute_micros - start_micros;
            (((gap + MINUTE_MICROS - 1) / MINUTE_MICROS) as usize).min(slots)
        }
    }
}

/// One slot per minute from `start`, each holding the latest sample at or before it.
///
/// Slots with no earlier sample, and values left missing by the source, are back-filled from
/// the next slot that has one.
pub fn minute_calendar(
    samples: &[WindSample],
    start_micros: i64,
    slots: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, usize) {
    let end = start_micros + slots.saturating_sub(1) as i64 * MINUTE_MICROS;
    let mut directions = Vec::with_capacity(slots);
    let mut speeds = Vec::with_capacity(slots);
    for slot in 0..slots {
        let at = start_micros + slot as i64 * MINUTE_MICROS;
        directions.push(value_at(samples, at, end, |s| s.direction_deg));
        speeds.push(value_at(samples, at, end, |s| s.speed_mph));
    }
    (directions, speeds, leading_minutes(samples, start_micros, slots))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionReport {
    pub calendar_minutes: usize,
    pub meteorology_rows: usize,
    pub duplicate_minutes: usize,
    /// Calendar minutes earlier than the first meteorology sample.
    pub backfilled_minutes: usize,
    pub coverage: WindCoverage,
}

/// Removes or adds wind columns so that fusion always writes into a clean slot.
pub fn prepare_wind_columns(df: &DataFrame, handling: WindHandling) -> PolarsResult<DataFrame> {
    let mut output = df.clone();
    match handling {
        WindHandling::ReplaceReported => {
            for name in [WIND_DIR, WIND_SPEED] {
                if output.column(name).is_ok() {
                    output = output.drop(name)?;
                }
            }
        }
        WindHandling::Fabricate => {
            for name in [WIND_DIR, WIND_SPEED] {
                if output.column(name).is_err() {
                    let placeholder = Series::full_null(name.into(), output.height(), &DataType::Float64);
                    output.with_column(placeholder)?;
                }
            }
        }
    }
    Ok(output)
}

/// Attaches `wind_dir` (degrees) and `wind_speed` (m/s) to every sensor row.
///
/// A one-minute calendar runs from the earliest to the latest `timestamp_utc`, and each
/// reading takes the calendar minute it falls in. When no reading receives any wind value the
/// coverage is [`WindCoverage::Missing`], same as an empty meteorology frame. Readings are matched by time, so gaps in
/// the sensor stream never shift wind values onto the wrong row.
pub fn fuse_meteorology(
    sensor: &DataFrame,
    meteorology: &DataFrame,
) -> PolarsResult<(DataFrame, FusionReport)> {
    let (samples, duplicate_minutes) = prepare_samples(meteorology)?;
    let height = sensor.height();

    let timestamps = sensor.column(TIMESTAMP_UTC)?.datetime()?;
    let instants: Vec<Option<i64>> = (0..height).map(|idx| timestamps.get(idx)).collect();
    let bounds = instants.iter().flatten().fold(None, |acc: Option<(i64, i64)>, &ts| {
        Some(match acc {
            None => (ts, ts),
            Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
        })
    });

    let mut directions: Vec<Option<f64>> = vec![None; height];
    let mut speeds: Vec<Option<f64>> = vec![None; height];
    let mut calendar_minutes = 0;
    let mut backfilled_minutes = 0;

    // Each reading resolves its own slot; the calendar is never materialised.
    if let Some((start, end)) = bounds {
        calendar_minutes = ((end - start) / MINUTE_MICROS) as usize + 1;
        backfilled_minutes = leading_minutes(&samples, start, calendar_minutes);
        let calendar_end = start + (calendar_minutes as i64 - 1) * MINUTE_MICROS;

        for (row, instant) in instants.iter().enumerate() {
            let Some(ts) = instant else {
                continue;
            };
            let at = start + ((ts - start) / MINUTE_MICROS) * MINUTE_MICROS;
            directions[row] = value_at(&samples, at, calendar_end, |s| s.direction_deg);
            speeds[row] =
                value_at(&samples, at, calendar_end, |s| s.speed_mph).map(|mph| mph * MPH_TO_MPS);
        }
    }

    let missing_rows = directions
        .iter()
        .zip(&speeds)
        .filter(|(dir, speed)| dir.is_none() || speed.is_none())
        .count();
    let windless_rows = directions
        .iter()
        .zip(&speeds)
        .filter(|(dir, speed)| dir.is_none() && speed.is_none())
        .count();
    let coverage = if samples.is_empty() || (height > 0 && windless_rows == height) {
        WindCoverage::Missing
    } else if missing_rows > 0 {
        WindCoverage::Partial { missing_rows }
    } else {
        WindCoverage::Complete
    };

    let mut output = sensor.clone();
    output.with_column(Series::new(WIND_DIR.into(), directions))?;
    output.with_column(Series::new(WIND_SPEED.into(), speeds))?;

    Ok((
        output,
        FusionReport {
            calendar_minutes,
            meteorology_rows: samples.len(),
            duplicate_minutes,
            backfilled_minutes,
            coverage,
        },
    ))
}
