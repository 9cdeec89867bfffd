use chrono::DateTime;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use polars::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, StoredEntry};
use crate::cutoffs::{apply_cutoffs, CutoffReport};
use crate::diagnostics::{summarize_columns, ColumnDiagnostics};
use crate::error::{PipelineError, Result};
use crate::fetch::MeteorologySource;
use crate::flatten::flatten_records;
use crate::meteorology::{fuse_meteorology, prepare_wind_columns, FusionReport};
use crate::outliers::{flag_spikes, SpikeReport};
use crate::timestamps::{self, DedupReport, RAW_TIMESTAMP};
use crate::types::{
    validate_sensor_id, CacheKey, CleanedDataset, DateRange, FamilySchema, MergeStrategy,
    SensorFamily, WindCoverage,
};

/// Sensor readings as they arrive, before any cleaning.
#[derive(Debug, Clone)]
pub enum RawInput {
    /// Parsed "final" and "raw" exports.
    Tables {
        final_table: DataFrame,
        raw_table: Option<DataFrame>,
    },
    /// Records from the sensor API, nested fields intact.
    Records {
        final_records: Vec<Value>,
        raw_records: Option<Vec<Value>>,
    },
}

#[derive(Debug, Clone)]
pub struct CleaningRequest {
    pub sensor_id: String,
    pub family: SensorFamily,
    /// `None` derives the range from the first and last reading.
    pub range: Option<DateRange>,
    pub smoothed: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub code: &'static str,
    pub version: &'static str,
    pub family: SensorFamily,
    pub description: &'static str,
}

static PIPELINES: Lazy<Vec<PipelineDescriptor>> = Lazy::new(|| {
    vec![
        PipelineDescriptor {
            code: "gas_phase_v1",
            version: "0.1.0",
            family: SensorFamily::GasPhase,
            description: "final/raw join + clamp subset + IEM wind replacement + spike removal",
        },
        PipelineDescriptor {
            code: "particulate_api_v1",
            version: "0.1.0",
            family: SensorFamily::ParticulateApi,
            description: "nested record flattening + clamp + IEM wind + spike removal",
        },
        PipelineDescriptor {
            code: "particulate_local_v1",
            version: "0.1.0",
            family: SensorFamily::ParticulateLocal,
            description: "final/raw join + clamp + IEM wind + spike removal",
        },
    ]
});

pub fn all_pipeline_descriptors() -> &'static [PipelineDescriptor] {
    PIPELINES.as_slice()
}

pub fn descriptor_for(family: SensorFamily) -> Result<&'static PipelineDescriptor> {
    PIPELINES
        .iter()
        .find(|descriptor| descriptor.family == family)
        .ok_or_else(|| PipelineError::Validation(format!("no pipeline registered for {family}")))
}

/// What each stage of one run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: &'static PipelineDescriptor,
    pub merged_rows: usize,
    pub dedup: DedupReport,
    pub diagnostics: Vec<ColumnDiagnostics>,
    pub cutoffs: CutoffReport,
    pub fusion: FusionReport,
    pub spikes: SpikeReport,
    pub stored: StoredEntry,
}

#[derive(Debug, Clone)]
pub struct CleaningOutcome {
    pub dataset: CleanedDataset,
    /// `None` when the dataset came straight from the cache.
    pub report: Option<RunReport>,
}

impl CleaningOutcome {
    pub fn from_cache(&self) -> bool {
        self.report.is_none()
    }
}

/// Readings merged, time-normalised and deduplicated, with the range they cover.
struct Prepared {
    dataframe: DataFrame,
    range: DateRange,
    merged_rows: usize,
    dedup: DedupReport,
}

/// Runs the cleaning stages for one sensor and publishes the result to the cache.
pub struct CleaningPipeline<'a> {
    meteorology: &'a dyn MeteorologySource,
    cache: &'a CacheStore,
    local_timezone: Tz,
}

impl<'a> CleaningPipeline<'a> {
    pub fn new(
        meteorology: &'a dyn MeteorologySource,
        cache: &'a CacheStore,
        local_timezone: Tz,
    ) -> Self {
        Self {
            meteorology,
            cache,
            local_timezone,
        }
    }

    /// Cleans `input` unconditionally, replacing any cached entry for the same key.
    pub fn run(&self, request: &CleaningRequest, input: RawInput) -> Result<CleaningOutcome> {
        let prepared = self.prepare(request, input)?;
        self.finish(request, prepared)
    }

    /// Returns the cached dataset for the request's key, cleaning only when there is none.
    ///
    /// `input` is only called on a cache miss, or when the range has to be derived from the
    /// readings themselves.
    pub fn load_or_run<F>(&self, request: &CleaningRequest, input: F) -> Result<CleaningOutcome>
    where
        F: FnOnce() -> Result<RawInput>,
    {
        if let Some(range) = request.range {
            let key = CacheKey::new(request.sensor_id.clone(), range, request.smoothed);
            if let Some(outcome) = self.cached(&key)? {
                return Ok(outcome);
            }
            return self.run(request, input()?);
        }

        let prepared = self.prepare(request, input()?)?;
        let key = CacheKey::new(request.sensor_id.clone(), prepared.range, request.smoothed);
        if let Some(outcome) = self.cached(&key)? {
            return Ok(outcome);
        }
        self.finish(request, prepared)
    }

    fn cached(&self, key: &CacheKey) -> Result<Option<CleaningOutcome>> {
        match self.cache.read(key) {
            Ok(dataset) => {
                info!(key = %key, rows = dataset.height(), "using cached dataset");
                Ok(Some(CleaningOutcome {
                    dataset,
                    report: None,
                }))
            }
            Err(err) if err.is_cache_miss() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn prepare(&self, request: &CleaningRequest, input: RawInput) -> Result<Prepared> {
        validate_sensor_id(&request.sensor_id)?;
        let schema = request.family.schema();
        let merged = merge_input(schema, input)?;
        let merged_rows = merged.height();
        info!(
            sensor_id = %request.sensor_id,
            family = %request.family,
            rows = merged_rows,
            columns = merged.width(),
            "merged sensor input"
        );
        if merged_rows == 0 {
            return Err(PipelineError::NoSensorData {
                sensor_id: request.sensor_id.clone(),
            });
        }

        let normalized = timestamps::normalize_timestamps(&merged, schema.local_timestamp)?;
        let (dataframe, dedup) = timestamps::deduplicate(&normalized)?;
        if dedup.removed() > 0 {
            warn!(
                sensor_id = %request.sensor_id,
                identical = dedup.identical,
                conflicting = dedup.conflicting,
                "dropped rows sharing a timestamp"
            );
        }

        let Some((first, last)) = timestamps::bounds_micros(&dataframe)? else {
            return Err(PipelineError::NoSensorData {
                sensor_id: request.sensor_id.clone(),
            });
        };
        let range = match request.range {
            Some(range) => range,
            None => {
                let (Some(first), Some(last)) = (
                    DateTime::from_timestamp_micros(first),
                    DateTime::from_timestamp_micros(last),
                ) else {
                    return Err(PipelineError::Validation(format!(
                        "readings span an unrepresentable instant range {first}..{last}"
                    )));
                };
                let derived = DateRange::covering(first, last);
                debug!(sensor_id = %request.sensor_id, range = %derived, "derived range from readings");
                derived
            }
        };

        Ok(Prepared {
            dataframe,
            range,
            merged_rows,
            dedup,
        })
    }

    fn finish(&self, request: &CleaningRequest, prepared: Prepared) -> Result<CleaningOutcome> {
        let schema = request.family.schema();
        let pipeline = descriptor_for(request.family)?;
        let Prepared {
            dataframe,
            range,
            merged_rows,
            dedup,
        } = prepared;

        let diagnostics = summarize_columns(&dataframe, schema.data_columns)?;
        for summary in &diagnostics {
            debug!(
                column = %summary.column,
                zeros = summary.zeros,
                negatives = summary.negatives,
                missing = summary.missing,
                mean = ?summary.mean,
                q25 = ?summary.q25,
                q75 = ?summary.q75,
                "column diagnostics"
            );
        }

        let with_wind = prepare_wind_columns(&dataframe, schema.wind)?;

        let (clamped, cutoffs) = apply_cutoffs(&with_wind, schema.clamp_columns, request.smoothed)?;
        info!(
            sensor_id = %request.sensor_id,
            smoothed = request.smoothed,
            changed = cutoffs.total_changed(),
            skipped = cutoffs.skipped.len(),
            "applied cutoffs"
        );

        let meteorology = self
            .meteorology
            .fetch(range.start_instant(), range.end_instant())?;
        let (fused, fusion) = fuse_meteorology(&clamped, &meteorology)?;
        match fusion.coverage {
            WindCoverage::Complete => info!(
                sensor_id = %request.sensor_id,
                meteorology_rows = fusion.meteorology_rows,
                calendar_minutes = fusion.calendar_minutes,
                "fused meteorology"
            ),
            WindCoverage::Partial { missing_rows } => warn!(
                sensor_id = %request.sensor_id,
                missing_rows,
                "wind values missing for some readings"
            ),
            WindCoverage::Missing => warn!(
                sensor_id = %request.sensor_id,
                range = %range,
                "no meteorology for range; wind columns left empty"
            ),
        }

        let (flagged, spikes) = flag_spikes(&fused, schema.data_columns)?;
        info!(
            sensor_id = %request.sensor_id,
            flagged = spikes.total_flagged(),
            "removed spikes"
        );

        let dataset = CleanedDataset {
            sensor_id: request.sensor_id.clone(),
            family: request.family,
            range,
            smoothed: request.smoothed,
            local_timezone: self.local_timezone,
            wind_coverage: fusion.coverage,
            dataframe: flagged,
        };
        let stored = self.cache.write(&dataset)?;

        info!(
            pipeline = pipeline.code,
            version = pipeline.version,
            key = %stored.key,
            rows = dataset.height(),
            "cleaning run complete"
        );

        Ok(CleaningOutcome {
            dataset,
            report: Some(RunReport {
                pipeline,
                merged_rows,
                dedup,
                diagnostics,
                cutoffs,
                fusion,
                spikes,
                stored,
            }),
        })
    }
}

/// Brings one family's input into a single flat frame still keyed by the textual timestamp.
pub fn merge_input(schema: &FamilySchema, input: RawInput) -> Result<DataFrame> {
    let (final_table, raw_table) = match input {
        RawInput::Tables {
            final_table,
            raw_table,
        } => (final_table, raw_table),
        RawInput::Records {
            final_records,
            raw_records,
        } => {
            let final_flat = flatten_records(&final_records, schema.nested_fields)?;
            let final_table = select_or_empty(schema, &final_flat, true)?;
            let raw_table = match raw_records {
                Some(records) => {
                    let flat = flatten_records(&records, schema.nested_fields)?;
                    Some(select_or_empty(schema, &flat, false)?)
                }
                None => None,
            };
            (final_table, raw_table)
        }
    };

    let mut merged = match (schema.merge, raw_table) {
        (MergeStrategy::JoinOnTimestamp, Some(raw)) => join_on_timestamp(&final_table, &raw)?,
        (MergeStrategy::JoinOnTimestamp, None) => {
            return Err(PipelineError::Validation(format!(
                "{} input needs both final and raw tables",
                schema.family
            )))
        }
        (MergeStrategy::FlattenNested, _) => final_table,
    };

    for dropped in schema.dropped_columns {
        if merged.column(dropped).is_ok() {
            merged = merged.drop(dropped)?;
        }
    }
    Ok(merged)
}

/// Applies a table contract to flattened records. No records at all is an empty frame.
fn select_or_empty(schema: &FamilySchema, flat: &DataFrame, is_final: bool) -> Result<DataFrame> {
    if flat.height() == 0 && flat.width() == 0 {
        return Ok(DataFrame::empty());
    }
    let spec = if is_final {
        Some(&schema.final_table)
    } else {
        schema.raw_table.as_ref()
    };
    match spec {
        Some(spec) => Ok(spec.select(flat)?),
        None => Ok(flat.clone()),
    }
}

fn join_on_timestamp(final_table: &DataFrame, raw_table: &DataFrame) -> Result<DataFrame> {
    if final_table.width() == 0 || raw_table.width() == 0 {
        return Ok(DataFrame::empty());
    }

    // Columns present on both sides are taken from the final table.
    let shared: Vec<String> = raw_table
        .get_column_names()
        .into_iter()
        .filter(|name| name.as_str() != RAW_TIMESTAMP)
        .filter(|name| final_table.column(name.as_str()).is_ok())
        .map(|name| name.to_string())
        .collect();
    let mut raw = raw_table.clone();
    for name in &shared {
        raw = raw.drop(name)?;
    }

    let joined = final_table
        .clone()
        .lazy()
        .join(
            raw.lazy(),
            [col(RAW_TIMESTAMP)],
            [col(RAW_TIMESTAMP)],
            JoinArgs::new(JoinType::Inner),
        )
        .collect()?;
    Ok(joined)
}
