use airpartners_core::outliers::{flag_spikes, sample_std, spike_mask};
use polars::prelude::*;

fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    let column = df.column(name).unwrap().f64().unwrap();
    (0..column.len()).map(|idx| column.get(idx)).collect()
}

#[test]
fn isolated_spike_is_marked() {
    let mask = spike_mask(&[Some(10.0), Some(500.0), Some(10.0)], 50.0);
    assert_eq!(mask, vec![false, true, false]);
}

#[test]
fn sustained_rise_is_not_marked() {
    let mask = spike_mask(&[Some(10.0), Some(500.0), Some(480.0)], 50.0);
    assert_eq!(mask, vec![false, false, false]);
}

#[test]
fn rows_without_both_neighbours_are_never_marked() {
    let mask = spike_mask(&[Some(900.0), Some(1.0), None, Some(900.0), Some(1.0)], 1.0);
    assert_eq!(mask, vec![false, false, false, false, false]);

    assert!(spike_mask(&[Some(1.0), Some(900.0)], 1.0).iter().all(|hit| !hit));
}

#[test]
fn sample_std_ignores_missing_values() {
    let std = sample_std(&[Some(2.0), None, Some(4.0), Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)])
        .unwrap();
    assert!((std - 2.138_089_935).abs() < 1e-6);
    assert_eq!(sample_std(&[Some(1.0), None]), None);
}

#[test]
fn flag_spikes_removes_single_sample_spike() {
    let df = polars::df![
        "co" => [10.0, 11.0, 10.0, 12.0, 250.0, 11.0, 10.0, 12.0, 11.0, 10.0],
        "o3" => [25.0, 26.0, 27.0, 25.0, 26.0, 27.0, 25.0, 26.0, 27.0, 25.0],
    ]
    .unwrap();

    let (flagged, report) = flag_spikes(&df, &["co", "o3", "no2"]).expect("flag");

    let co = values(&flagged, "co");
    assert_eq!(co[4], None);
    assert_eq!(co.iter().filter(|v| v.is_none()).count(), 1);
    assert_eq!(values(&flagged, "o3"), values(&df, "o3"));

    assert_eq!(report.for_column("co").unwrap().flagged, 1);
    assert_eq!(report.for_column("o3").unwrap().flagged, 0);
    assert_eq!(report.skipped.len(), 1);
}

#[test]
fn flag_spikes_is_idempotent() {
    // A large spike masks a smaller one until the first is gone.
    let df = polars::df![
        "pm25" => [
            5.0, 6.0, 5.0, 6.0, 5.0, 2000.0, 6.0, 5.0, 6.0, 5.0,
            6.0, 5.0, 60.0, 5.0, 6.0, 5.0, 6.0, 5.0, 6.0, 5.0,
        ],
    ]
    .unwrap();

    let (once, first) = flag_spikes(&df, &["pm25"]).unwrap();
    let (twice, second) = flag_spikes(&once, &["pm25"]).unwrap();

    assert!(once.equals_missing(&twice));
    assert_eq!(second.total_flagged(), 0);
    assert_eq!(first.for_column("pm25").unwrap().flagged, 2);
    assert!(first.for_column("pm25").unwrap().passes >= 2);

    let pm25 = values(&once, "pm25");
    assert_eq!(pm25[5], None);
    assert_eq!(pm25[12], None);
}

#[test]
fn flat_series_has_no_spikes() {
    let df = polars::df!["pm10" => [8.0, 8.0, 8.0, 8.0, 8.0]].unwrap();

    let (flagged, report) = flag_spikes(&df, &["pm10"]).unwrap();

    assert!(flagged.equals_missing(&df));
    assert_eq!(report.total_flagged(), 0);
}

#[test]
fn degenerate_deviation_marks_nothing() {
    let values = [Some(1.0), Some(900.0), Some(1.0)];
    for stddev in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(spike_mask(&values, stddev).iter().all(|hit| !hit));
    }
}
