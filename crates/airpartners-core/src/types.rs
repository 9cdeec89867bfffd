// crates/airpartners-core/src/types.rs

use std::fmt;
use std::str::FromStr;

use airpartners_parser::TableSpec;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::flatten::NestedField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFamily {
    /// `SN` instruments: gas-phase electrochemical cells plus an optical PM proxy.
    GasPhase,
    /// `MOD-PM` instruments pulled from the REST API (nested records).
    ParticulateApi,
    /// `MOD-PM` instruments loaded from flat local exports.
    ParticulateLocal,
}

impl SensorFamily {
    pub fn code(&self) -> &'static str {
        match self {
            SensorFamily::GasPhase => "gas_phase",
            SensorFamily::ParticulateApi => "particulate_api",
            SensorFamily::ParticulateLocal => "particulate_local",
        }
    }

    pub fn schema(&self) -> &'static FamilySchema {
        match self {
            SensorFamily::GasPhase => &GAS_PHASE,
            SensorFamily::ParticulateApi => &PARTICULATE_API,
            SensorFamily::ParticulateLocal => &PARTICULATE_LOCAL,
        }
    }

    /// Picks the family from the sensor serial number prefix.
    pub fn infer(sensor_id: &str, from_api: bool) -> Result<Self> {
        let upper = sensor_id.trim().to_ascii_uppercase();
        if upper.starts_with("SN") {
            Ok(SensorFamily::GasPhase)
        } else if upper.starts_with("MOD") {
            if from_api {
                Ok(SensorFamily::ParticulateApi)
            } else {
                Ok(SensorFamily::ParticulateLocal)
            }
        } else {
            Err(PipelineError::Validation(format!(
                "cannot infer sensor family from id '{sensor_id}'"
            )))
        }
    }
}

impl fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SensorFamily {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "gas_phase" | "gas" | "sn" => Ok(SensorFamily::GasPhase),
            "particulate_api" => Ok(SensorFamily::ParticulateApi),
            "particulate_local" | "particulate" | "mod_pm" => Ok(SensorFamily::ParticulateLocal),
            other => Err(PipelineError::Validation(format!(
                "unknown sensor family '{other}'"
            ))),
        }
    }
}

/// How the family's input tables become a single flat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// "final" and "raw" tables inner-joined on their shared `timestamp` text.
    JoinOnTimestamp,
    /// Nested API records expanded into top-level columns.
    FlattenNested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTimestamp {
    Required,
    IfPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindHandling {
    /// The instrument reports wind, but it is unreliable and gets discarded.
    ReplaceReported,
    /// The instrument has no wind columns; placeholders are added before fusion.
    Fabricate,
}

#[derive(Debug)]
pub struct FamilySchema {
    pub family: SensorFamily,
    pub data_columns: &'static [&'static str],
    pub clamp_columns: &'static [&'static str],
    pub final_table: TableSpec,
    pub raw_table: Option<TableSpec>,
    pub nested_fields: &'static [NestedField],
    pub dropped_columns: &'static [&'static str],
    pub merge: MergeStrategy,
    pub local_timestamp: LocalTimestamp,
    pub wind: WindHandling,
}

const GAS_DATA_COLUMNS: &[&str] = &["co", "no", "no2", "o3", "pm1", "co2", "no_ae", "bin0"];
const GAS_CLAMP_COLUMNS: &[&str] = &["o3", "co", "no2", "bin0", "pm1", "no"];
const GAS_FINAL_COLUMNS: &[&str] = &[
    "timestamp",
    "timestamp_local",
    "temp_box",
    "temp_manifold",
    "rh_manifold",
    "pressure",
    "noise",
    "solar",
    "wind_dir",
    "wind_speed",
    "co",
    "no",
    "no2",
    "o3",
    "pm1",
    "pm25",
    "pm10",
    "co2",
];
const GAS_RAW_COLUMNS: &[&str] = &[
    "timestamp", "bin0", "bin1", "bin2", "bin3", "bin4", "bin5", "no_ae", "co_ae", "no2_ae",
];

const PM_API_COLUMNS: &[&str] = &["pm1", "pm10", "pm25"];
const PM_NESTED_FIELDS: &[NestedField] = &[
    NestedField::prefixed("neph", "neph_"),
    NestedField::prefixed("opc", "opc_"),
    NestedField::unprefixed("met"),
];

const PM_LOCAL_COLUMNS: &[&str] = &[
    "bin0", "bin1", "bin2", "bin3", "bin4", "bin5", "bin6", "bin7", "bin8", "bin9", "bin10",
    "bin11", "bin12", "bin13", "bin14", "bin15", "bin16", "bin17", "bin18", "bin19", "bin20",
    "bin21", "bin22", "bin23", "opcn3_pm1", "opcn3_pm25", "opcn3_pm10", "pm1_env", "pm25_env",
    "pm10_env", "neph_bin0", "neph_bin1", "neph_bin2", "neph_bin3", "neph_bin4", "neph_bin5",
    "pm1", "pm10", "pm25",
];
const PM_LOCAL_FINAL_COLUMNS: &[&str] = &[
    "timestamp",
    "pm1",
    "pm25",
    "pm10",
    "pm1_model_id",
    "pm25_model_id",
    "pm10_model_id",
];

static GAS_PHASE: FamilySchema = FamilySchema {
    family: SensorFamily::GasPhase,
    data_columns: GAS_DATA_COLUMNS,
    clamp_columns: GAS_CLAMP_COLUMNS,
    final_table: TableSpec::only("gas_phase_final", GAS_FINAL_COLUMNS),
    raw_table: Some(TableSpec::only("gas_phase_raw", GAS_RAW_COLUMNS)),
    nested_fields: &[],
    dropped_columns: &[],
    merge: MergeStrategy::JoinOnTimestamp,
    local_timestamp: LocalTimestamp::Required,
    wind: WindHandling::ReplaceReported,
};

static PARTICULATE_API: FamilySchema = FamilySchema {
    family: SensorFamily::ParticulateApi,
    data_columns: PM_API_COLUMNS,
    clamp_columns: PM_API_COLUMNS,
    final_table: TableSpec::all("particulate_api", &["timestamp"]),
    raw_table: None,
    nested_fields: PM_NESTED_FIELDS,
    // Final records only; raw-record pruning does not apply.
    dropped_columns: &["url", "timestamp_local"],
    merge: MergeStrategy::FlattenNested,
    local_timestamp: LocalTimestamp::IfPresent,
    wind: WindHandling::Fabricate,
};

static PARTICULATE_LOCAL: FamilySchema = FamilySchema {
    family: SensorFamily::ParticulateLocal,
    data_columns: PM_LOCAL_COLUMNS,
    clamp_columns: PM_LOCAL_COLUMNS,
    final_table: TableSpec::only("particulate_final", PM_LOCAL_FINAL_COLUMNS),
    raw_table: Some(TableSpec::all("particulate_raw", &["timestamp"])),
    nested_fields: &[],
    dropped_columns: &[],
    merge: MergeStrategy::JoinOnTimestamp,
    local_timestamp: LocalTimestamp::IfPresent,
    wind: WindHandling::Fabricate,
};

/// Calendar dates a cleaning run covers. `end` follows the sensor API convention of being
/// exclusive when used as a request bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(PipelineError::Validation(format!(
                "date range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The dates spanned by the first and last observed instants.
    pub fn covering(first: DateTime<Utc>, last: DateTime<Utc>) -> Self {
        let (first, last) = if last < first { (last, first) } else { (first, last) };
        Self {
            start: first.date_naive(),
            end: last.date_naive(),
        }
    }

    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn end_instant(&self) -> DateTime<Utc> {
        self.end.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Checks that a sensor id can name exactly one directory below the cache root.
pub fn validate_sensor_id(sensor_id: &str) -> Result<()> {
    let unusable = sensor_id.trim().is_empty()
        || sensor_id.contains("..")
        || sensor_id
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0' | '*' | '?' | '[' | ']'));
    if unusable {
        return Err(PipelineError::Validation(format!(
            "sensor id '{}' cannot be used as a cache directory",
            sensor_id.escape_debug()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub sensor_id: String,
    pub range: DateRange,
    pub smoothed: bool,
}

impl CacheKey {
    pub fn new(sensor_id: impl Into<String>, range: DateRange, smoothed: bool) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            range,
            smoothed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_sensor_id(&self.sensor_id)
    }

    pub fn file_stem(&self) -> String {
        let DateRange { start, end } = self.range;
        let mut stem = format!(
            "{}_{}_{}_{}_{}_{}",
            start.year(),
            start.month(),
            start.day(),
            end.year(),
            end.month(),
            end.day()
        );
        if self.smoothed {
            stem.push_str("_smoothed");
        }
        stem
    }

    pub fn month_prefix(&self) -> String {
        format!("{:04}-{:02}", self.range.start.year(), self.range.start.month())
    }

    pub fn relative_dir(&self) -> String {
        format!("{}/qaq_cleaned_data/{}", self.month_prefix(), self.sensor_id)
    }

    pub fn relative_path(&self) -> String {
        format!("{}/{}.zip", self.relative_dir(), self.file_stem())
    }

    /// Inverse of [`CacheKey::file_stem`].
    pub fn parse(sensor_id: &str, file_stem: &str) -> Result<Self> {
        validate_sensor_id(sensor_id)?;
        let invalid =
            || PipelineError::Validation(format!("'{file_stem}' is not a cache entry name"));

        let (body, smoothed) = match file_stem.strip_suffix("_smoothed") {
            Some(body) => (body, true),
            None => (file_stem, false),
        };
        let parts: Vec<u32> = body
            .split('_')
            .map(|part| part.parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| invalid())?;
        let &[sy, sm, sd, ey, em, ed] = parts.as_slice() else {
            return Err(invalid());
        };

        let date = |y: u32, m: u32, d: u32| {
            i32::try_from(y)
                .ok()
                .and_then(|y| NaiveDate::from_ymd_opt(y, m, d))
                .ok_or_else(invalid)
        };
        let range = DateRange::new(date(sy, sm, sd)?, date(ey, em, ed)?)?;
        Ok(Self::new(sensor_id, range, smoothed))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.smoothed { "smoothed" } else { "unsmoothed" };
        write!(f, "{}[{}, {}]", self.sensor_id, self.range, mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindCoverage {
    Complete,
    /// Some readings have no wind value even after fill.
    Partial { missing_rows: usize },
    /// The meteorology source had no usable rows; wind columns are entirely null.
    Missing,
}

impl WindCoverage {
    pub fn is_complete(&self) -> bool {
        matches!(self, WindCoverage::Complete)
    }
}

/// The cleaned readings of one sensor over one date range, plus how they were produced.
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    pub sensor_id: String,
    pub family: SensorFamily,
    pub range: DateRange,
    pub smoothed: bool,
    /// Zone of `timestamp_local`. That column holds naive wall-clock fields; pairing them
    /// with this zone gives the civil time. Nothing is resolved through UTC offsets, so
    /// wall-clock values inside DST transitions are kept exactly as reported.
    pub local_timezone: Tz,
    pub wind_coverage: WindCoverage,
    pub dataframe: DataFrame,
}

impl CleanedDataset {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.sensor_id.clone(), self.range, self.smoothed)
    }

    pub fn height(&self) -> usize {
        self.dataframe.height()
    }

    pub fn is_wind_complete(&self) -> bool {
        self.wind_coverage.is_complete()
    }
}
