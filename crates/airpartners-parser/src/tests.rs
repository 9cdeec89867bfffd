use std::fs;
use std::path::PathBuf;

use polars::prelude::*;

use crate::errors::ParserError;
use crate::formats::{
    parse_export, parse_iem_response, parse_timestamp_micros, parse_wall_clock_micros, TableSpec,
};

fn fixture(path: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

const GAS_RAW: TableSpec = TableSpec::only(
    "test_raw",
    &["timestamp", "bin0", "no_ae", "co_ae", "no2_ae"],
);

#[test]
fn parses_selected_columns_in_spec_order() {
    let df = parse_export(&fixture("SN000-072_raw.csv"), &GAS_RAW).expect("raw parse failed");

    assert_eq!(
        df.get_column_names(),
        ["timestamp", "bin0", "no_ae", "co_ae", "no2_ae"]
    );
    assert_eq!(df.height(), 10);
    assert_eq!(df.column("timestamp").unwrap().dtype(), &DataType::String);
    assert_eq!(df.column("bin0").unwrap().dtype(), &DataType::Float64);
    assert_eq!(df.column("bin0").unwrap().f64().unwrap().get(2), Some(102.0));
}

#[test]
fn keep_all_retains_text_and_numeric_columns() {
    let spec = TableSpec::all("test_all", &["timestamp"]);
    let df = parse_export(&fixture("MOD-PM-00117_raw.csv"), &spec).expect("parse failed");

    assert_eq!(df.width(), 11);
    assert_eq!(df.column("sn").unwrap().dtype(), &DataType::String);
    assert_eq!(df.column("timestamp_local").unwrap().dtype(), &DataType::String);
    assert_eq!(df.column("opcn3_pm25").unwrap().dtype(), &DataType::Float64);
}

#[test]
fn blank_cells_are_missing_and_model_ids_stay_text() {
    let final_spec = TableSpec::only(
        "test_final",
        &["timestamp", "noise", "solar", "co"],
    );
    let df = parse_export(&fixture("SN000-072_final.csv"), &final_spec).expect("parse failed");
    assert_eq!(df.height(), 11);
    assert_eq!(df.column("noise").unwrap().null_count(), 11);

    let pm_spec = TableSpec::only("test_pm", &["timestamp", "pm1", "pm1_model_id"]);
    let pm = parse_export(&fixture("MOD-PM-00117_final.csv"), &pm_spec).expect("parse failed");
    assert_eq!(pm.column("pm1_model_id").unwrap().dtype(), &DataType::String);
    assert_eq!(pm.column("pm1").unwrap().f64().unwrap().get(3), Some(-2.0));
}

#[test]
fn missing_required_column_is_reported() {
    let spec = TableSpec::only("test_missing", &["timestamp", "o3_ae"]);
    let err = parse_export(&fixture("SN000-072_raw.csv"), &spec).unwrap_err();
    match err {
        ParserError::MissingColumn { column, .. } => assert_eq!(column, "o3_ae"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn header_only_export_yields_empty_frame() {
    let df = parse_export("timestamp,bin0,no_ae,co_ae,no2_ae\n", &GAS_RAW).expect("parse failed");
    assert_eq!(df.height(), 0);
    assert_eq!(df.width(), 5);
}

#[test]
fn empty_export_is_rejected() {
    let err = parse_export("", &GAS_RAW).unwrap_err();
    assert!(matches!(err, ParserError::EmptyData { .. }));
}

#[test]
fn parses_iem_response() {
    let df = parse_iem_response(&fixture("iem_bos.csv")).expect("iem parse failed");
    assert_eq!(df.height(), 2);
    assert_eq!(
        df.get_column_names(),
        ["timestamp_utc", "wind_dir", "wind_speed_mph"]
    );

    let ts = df.column("timestamp_utc").unwrap().datetime().unwrap();
    let expected = parse_timestamp_micros("2021-03-01T12:02:00Z").unwrap();
    assert_eq!(ts.get(0), Some(expected));
    assert_eq!(df.column("wind_dir").unwrap().f64().unwrap().get(1), Some(220.0));
}

#[test]
fn iem_missing_marker_becomes_null() {
    let body = "station,valid,drct,sped\nBOS,2021-03-01 12:02,M,10.00\nBOS,2021-03-01 12:07,220.00,\n";
    let df = parse_iem_response(body).expect("iem parse failed");
    assert_eq!(df.column("wind_dir").unwrap().f64().unwrap().get(0), None);
    assert_eq!(df.column("wind_speed_mph").unwrap().f64().unwrap().get(1), None);
}

#[test]
fn iem_error_and_empty_bodies_are_empty_frames() {
    for body in [fixture("iem_error.txt"), String::new(), "station,valid,drct,sped\n".to_string()] {
        let df = parse_iem_response(&body).expect("iem parse failed");
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 3);
    }
}

#[test]
fn timestamp_formats() {
    let base = parse_timestamp_micros("2021-03-01T12:00:00Z").unwrap();
    assert_eq!(parse_timestamp_micros("2021-03-01 12:00:00"), Some(base));
    assert_eq!(parse_timestamp_micros("2021-03-01T12:00:00"), Some(base));
    assert_eq!(parse_timestamp_micros("2021-03-01 12:00"), Some(base));
    assert_eq!(parse_timestamp_micros("2021-03-01T07:00:00-05:00"), Some(base));
    assert_eq!(parse_timestamp_micros("2021-03-01 12:00:00+00:00"), Some(base));
    assert_eq!(
        parse_timestamp_micros("2021-03-01T12:00:00.5Z"),
        Some(base + 500_000)
    );
    assert_eq!(parse_timestamp_micros("not a time"), None);
    assert_eq!(parse_timestamp_micros(""), None);
}

#[test]
fn wall_clock_parse_ignores_offsets() {
    let expected = parse_timestamp_micros("2021-03-01 07:00:00").unwrap();

    assert_eq!(parse_wall_clock_micros("2021-03-01T07:00:00Z"), Some(expected));
    assert_eq!(parse_wall_clock_micros("2021-03-01T07:00:00-05:00"), Some(expected));
    assert_eq!(parse_wall_clock_micros("2021-03-01 07:00:00+02:00"), Some(expected));
    assert_eq!(parse_wall_clock_micros("2021-03-01 07:00:00"), Some(expected));
    assert_eq!(parse_wall_clock_micros("  "), None);
}

#[test]
fn table_spec_select_applies_column_contract() {
    let df = polars::df![
        "co" => [1.0, 2.0],
        "extra" => ["a", "b"],
        "timestamp" => ["2021-03-01 12:00:00", "2021-03-01 12:01:00"],
    ]
    .unwrap();

    let only = TableSpec::only("records", &["timestamp", "co"]);
    let selected = only.select(&df).expect("select failed");
    assert_eq!(selected.get_column_names(), ["timestamp", "co"]);

    let all = TableSpec::all("records", &["timestamp"]);
    assert_eq!(all.select(&df).unwrap().width(), 3);

    let missing = TableSpec::only("records", &["timestamp", "o3"]);
    match missing.select(&df) {
        Err(ParserError::MissingColumn { column, .. }) => assert_eq!(column, "o3"),
        other => panic!("expected missing column error, got {other:?}"),
    }
}
