use std::cell::Cell;
use std::fs;
use std::path::PathBuf;

use airpartners_core::fetch::{load_local_export, MeteorologySource};
use airpartners_core::meteorology::{MPH_TO_MPS, WIND_DIR, WIND_SPEED};
use airpartners_core::pipelines::{CleaningPipeline, CleaningRequest, RawInput};
use airpartners_core::types::{DateRange, SensorFamily, WindCoverage};
use airpartners_core::{CacheStore, PipelineError, Result};
use airpartners_parser::parse_iem_response;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::America::New_York;
use polars::prelude::*;
use serde_json::json;
use uuid::Uuid;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../airpartners-parser/tests/data")
        .join(name)
}

struct TempRoot(PathBuf);

impl TempRoot {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("airpartners-pipeline-{}", Uuid::new_v4()));
        fs::create_dir_all(&path).expect("create temp root");
        Self(path)
    }
}

impl Drop for TempRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Serves the BOS fixture (or nothing) and counts requests.
struct FixtureMeteorology {
    frame: DataFrame,
    calls: Cell<usize>,
}

impl FixtureMeteorology {
    fn bos() -> Self {
        let content = fs::read_to_string(fixture_path("iem_bos.csv")).expect("read iem fixture");
        Self {
            frame: parse_iem_response(&content).expect("parse iem fixture"),
            calls: Cell::new(0),
        }
    }

    fn empty() -> Self {
        Self {
            frame: parse_iem_response("").expect("empty iem frame"),
            calls: Cell::new(0),
        }
    }
}

impl MeteorologySource for FixtureMeteorology {
    fn fetch(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<DataFrame> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.frame.clone())
    }
}

struct UnreachableMeteorology;

impl MeteorologySource for UnreachableMeteorology {
    fn fetch(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<DataFrame> {
        Err(PipelineError::SourceUnavailable {
            source_name: "meteorology",
            attempts: 6,
            message: "connection refused".to_string(),
        })
    }
}

fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    let column = df.column(name).unwrap().f64().unwrap();
    (0..column.len()).map(|idx| column.get(idx)).collect()
}

fn gas_input() -> RawInput {
    load_local_export(
        SensorFamily::GasPhase,
        &fixture_path("SN000-072_final.csv"),
        Some(fixture_path("SN000-072_raw.csv").as_path()),
    )
    .expect("load gas exports")
}

fn particulate_input() -> RawInput {
    load_local_export(
        SensorFamily::ParticulateLocal,
        &fixture_path("MOD-PM-00117_final.csv"),
        Some(fixture_path("MOD-PM-00117_raw.csv").as_path()),
    )
    .expect("load particulate exports")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
}

#[test]
fn gas_phase_exports_are_cleaned_end_to_end() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "SN000-072".to_string(),
        family: SensorFamily::GasPhase,
        range: None,
        smoothed: true,
    };

    let outcome = pipeline.run(&request, gas_input()).expect("run");
    let dataset = &outcome.dataset;
    let report = outcome.report.as_ref().expect("fresh run has a report");
    let df = &dataset.dataframe;

    assert_eq!(report.merged_rows, 11);
    assert_eq!(report.dedup.identical, 1);
    assert_eq!(df.height(), 10);
    assert_eq!(dataset.range, DateRange::new(day(1), day(1)).unwrap());
    assert_eq!(
        df.column("timestamp_local").unwrap().dtype(),
        &DataType::Datetime(TimeUnit::Microseconds, None)
    );
    assert_eq!(dataset.local_timezone, New_York);
    assert!(df.column("bin0").is_ok());
    assert!(df.column("sn").is_err());

    // no2 -3 at 12:02 is missing, pm1 450/460 at 12:07-12:08 are zeroed.
    assert_eq!(values(df, "no2")[2], None);
    assert_eq!(values(df, "pm1")[7], Some(0.0));
    assert_eq!(values(df, "pm1")[8], Some(0.0));
    assert_eq!(report.cutoffs.for_column("no2").unwrap().negatives_nulled, 1);
    assert_eq!(report.cutoffs.for_column("pm1").unwrap().ceiling_zeroed, 2);

    // The co spike at 12:04 is removed; its neighbours stay.
    let co = values(df, "co");
    assert_eq!(co[3], Some(12.0));
    assert_eq!(co[4], None);
    assert_eq!(co[5], Some(11.0));
    assert_eq!(report.spikes.for_column("co").unwrap().flagged, 1);

    // Reported wind is discarded in favour of the station record.
    let dirs = values(df, WIND_DIR);
    assert_eq!(&dirs[0..7], &[Some(200.0); 7]);
    assert_eq!(&dirs[7..10], &[Some(220.0); 3]);
    let speeds = values(df, WIND_SPEED);
    assert!((speeds[0].unwrap() - 10.0 * MPH_TO_MPS).abs() < 1e-9);
    assert!((speeds[9].unwrap() - 15.0 * MPH_TO_MPS).abs() < 1e-9);
    assert_eq!(dataset.wind_coverage, WindCoverage::Complete);

    let cached = cache.read(&dataset.key()).expect("cached");
    assert!(cached.dataframe.equals_missing(df));
    assert_eq!(report.stored.key, dataset.key());
}

#[test]
fn particulate_smoothing_changes_extreme_handling() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);

    let request = |smoothed| CleaningRequest {
        sensor_id: "MOD-PM-00117".to_string(),
        family: SensorFamily::ParticulateLocal,
        range: None,
        smoothed,
    };

    let smoothed = pipeline.run(&request(true), particulate_input()).unwrap();
    let unsmoothed = pipeline.run(&request(false), particulate_input()).unwrap();

    let s = &smoothed.dataset.dataframe;
    let u = &unsmoothed.dataset.dataframe;
    assert_eq!(s.height(), 10);
    assert!(s.column("timestamp_local").is_ok());
    assert!(s.column("opcn3_pm25").is_ok());

    assert_eq!(values(s, "pm1")[3], None);
    assert_eq!(values(s, "pm25")[4], None);
    assert_eq!(values(u, "pm25")[4], None);

    // 350 becomes zero when smoothed, and is removed as a spike otherwise.
    assert_eq!(values(s, "pm10")[7], Some(0.0));
    assert_eq!(values(u, "pm10")[7], None);

    assert_eq!(s.column(WIND_DIR).unwrap().null_count(), 0);
    assert_ne!(smoothed.dataset.key(), unsmoothed.dataset.key());
    assert_eq!(cache.list(Some("MOD-PM-00117")).unwrap().len(), 2);
}

#[test]
fn cached_dataset_short_circuits_the_run() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "SN000-072".to_string(),
        family: SensorFamily::GasPhase,
        range: Some(DateRange::new(day(1), day(2)).unwrap()),
        smoothed: true,
    };

    let first = pipeline.load_or_run(&request, || Ok(gas_input())).unwrap();
    assert!(!first.from_cache());

    let second = pipeline
        .load_or_run(&request, || panic!("input should not be loaded on a cache hit"))
        .unwrap();
    assert!(second.from_cache());
    assert_eq!(meteorology.calls.get(), 1);
    assert!(second.dataset.dataframe.equals_missing(&first.dataset.dataframe));
}

#[test]
fn derived_range_can_hit_the_cache() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "SN000-072".to_string(),
        family: SensorFamily::GasPhase,
        range: None,
        smoothed: false,
    };

    pipeline.load_or_run(&request, || Ok(gas_input())).unwrap();
    let again = pipeline.load_or_run(&request, || Ok(gas_input())).unwrap();

    assert!(again.from_cache());
    assert_eq!(meteorology.calls.get(), 1);
}

#[test]
fn api_records_are_flattened_before_cleaning() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);

    let records: Vec<serde_json::Value> = (0..10)
        .map(|minute| {
            let pm1 = if minute == 3 { -1.0 } else { 3.0 };
            let pm25 = 5.0 + (minute % 2) as f64;
            json!({
                "timestamp": format!("2021-03-01T12:{minute:02}:00Z"),
                "timestamp_local": format!("2021-03-01T07:{minute:02}:00Z"),
                "url": format!("https://example.invalid/{minute}"),
                "sn": "MOD-PM-00117",
                "pm1": pm1,
                "pm25": pm25,
                "pm10": 8.0,
                "neph": { "bin0": 12, "pm25": 4.5 },
                "opc": { "bin0": 40 },
                "met": { "rh": 55.0, "temp": 3.5 }
            })
        })
        .collect();
    let request = CleaningRequest {
        sensor_id: "MOD-PM-00117".to_string(),
        family: SensorFamily::ParticulateApi,
        range: Some(DateRange::new(day(1), day(2)).unwrap()),
        smoothed: true,
    };

    let outcome = pipeline
        .run(
            &request,
            RawInput::Records {
                final_records: records,
                raw_records: None,
            },
        )
        .unwrap();
    let df = &outcome.dataset.dataframe;

    assert_eq!(df.height(), 10);
    assert!(df.column("url").is_err());
    assert!(df.column("timestamp_local").is_err());
    assert!(df.column("neph_bin0").is_ok());
    assert!(df.column("opc_bin0").is_ok());
    assert!(df.column("rh").is_ok());
    assert_eq!(values(df, "pm1")[3], None);
    assert_eq!(df.column(WIND_SPEED).unwrap().null_count(), 0);
    assert_eq!(outcome.dataset.range, request.range.unwrap());
}

#[test]
fn no_rows_is_an_error_and_nothing_is_cached() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "MOD-PM-00117".to_string(),
        family: SensorFamily::ParticulateApi,
        range: Some(DateRange::new(day(1), day(2)).unwrap()),
        smoothed: true,
    };

    let err = pipeline
        .run(
            &request,
            RawInput::Records {
                final_records: Vec::new(),
                raw_records: None,
            },
        )
        .expect_err("empty input");

    assert!(matches!(err, PipelineError::NoSensorData { .. }));
    assert!(cache.list(None).unwrap().is_empty());
    assert_eq!(meteorology.calls.get(), 0);
}

#[test]
fn unavailable_meteorology_aborts_without_caching() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let pipeline = CleaningPipeline::new(&UnreachableMeteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "SN000-072".to_string(),
        family: SensorFamily::GasPhase,
        range: None,
        smoothed: true,
    };

    let err = pipeline.run(&request, gas_input()).expect_err("should abort");

    assert!(matches!(err, PipelineError::SourceUnavailable { attempts: 6, .. }));
    assert!(cache.list(None).unwrap().is_empty());
}

#[test]
fn empty_meteorology_marks_dataset_wind_incomplete() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::empty();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "SN000-072".to_string(),
        family: SensorFamily::GasPhase,
        range: None,
        smoothed: true,
    };

    let outcome = pipeline.run(&request, gas_input()).unwrap();

    assert_eq!(outcome.dataset.wind_coverage, WindCoverage::Missing);
    assert!(!outcome.dataset.is_wind_complete());
    assert_eq!(
        outcome.dataset.dataframe.column(WIND_DIR).unwrap().null_count(),
        outcome.dataset.height()
    );
    assert_eq!(
        cache.read(&outcome.dataset.key()).unwrap().wind_coverage,
        WindCoverage::Missing
    );
}

#[test]
fn unusable_sensor_id_is_rejected_before_fetching() {
    let root = TempRoot::new();
    let cache = CacheStore::new(&root.0);
    let meteorology = FixtureMeteorology::bos();
    let pipeline = CleaningPipeline::new(&meteorology, &cache, New_York);
    let request = CleaningRequest {
        sensor_id: "../SN000-072".to_string(),
        family: SensorFamily::GasPhase,
        range: None,
        smoothed: true,
    };

    let err = pipeline.run(&request, gas_input()).expect_err("refused");

    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(meteorology.calls.get(), 0);
    assert!(cache.list(None).unwrap().is_empty());
}
