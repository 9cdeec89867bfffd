use airpartners_core::diagnostics::{quantile, summarize_columns};
use polars::prelude::*;

#[test]
fn quantiles_interpolate_between_ranks() {
    let sorted = [1.0, 2.0, 3.0, 4.0];
    assert_eq!(quantile(&sorted, 0.25), Some(1.75));
    assert_eq!(quantile(&sorted, 0.75), Some(3.25));
    assert_eq!(quantile(&sorted, 0.0), Some(1.0));
    assert_eq!(quantile(&sorted, 1.0), Some(4.0));
    assert_eq!(quantile(&[], 0.5), None);
}

#[test]
fn summaries_count_zeros_negatives_and_gaps() {
    let df = polars::df![
        "no2" => [Some(-2.0), Some(0.0), None, Some(4.0), Some(8.0)],
        "sn" => ["a", "a", "a", "a", "a"],
    ]
    .unwrap();

    let summaries = summarize_columns(&df, &["no2", "sn", "o3"]).unwrap();
    assert_eq!(summaries.len(), 1);

    let no2 = &summaries[0];
    assert_eq!(no2.column, "no2");
    assert_eq!(no2.rows, 5);
    assert_eq!(no2.zeros, 1);
    assert_eq!(no2.negatives, 1);
    assert_eq!(no2.missing, 1);
    assert_eq!(no2.mean, Some(2.5));
    assert_eq!(no2.q25, Some(-0.5));
    assert_eq!(no2.q75, Some(5.0));
}

#[test]
fn all_missing_column_is_summarized_as_empty() {
    let df = polars::df!["co" => [None::<f64>, None, None]].unwrap();

    let summaries = summarize_columns(&df, &["co"]).unwrap();
    assert_eq!(summaries[0].missing, 3);
    assert_eq!(summaries[0].mean, None);
    assert_eq!(summaries[0].q25, None);
}
