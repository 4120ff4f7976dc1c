//! Integration tests for the polars execution engine.

#![cfg(feature = "polars")]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

use dqverify_core::config::ResultFormat;
use dqverify_core::engine::frame::FrameExecutionEngine;
use dqverify_core::{
    BatchSpec, ExecutionEngine, ExpectationConfiguration, Kwargs, MetricConfiguration,
    MetricValues, ResultFormatConfig, RuntimeConfiguration, Validator,
};
use serde_json::{Value, json};

async fn validator_with(records: Value) -> Validator<FrameExecutionEngine> {
    let mut validator = Validator::new(FrameExecutionEngine::new());
    validator
        .load_batch(BatchSpec::records(records).with_batch_id("frame"))
        .await
        .expect("Failed to load dataframe");
    validator
}

fn complete() -> RuntimeConfiguration {
    RuntimeConfiguration::new()
        .with_result_format(ResultFormatConfig::new().with_result_format(ResultFormat::Complete))
}

#[tokio::test]
async fn test_aggregates_bundle_into_one_collect() {
    let validator = validator_with(json!([
        {"a": 1}, {"a": null}, {"a": 3}, {"a": null}, {"a": 5}
    ]))
    .await;
    let engine = validator.engine();

    let column = Kwargs::new().with("column", "a");
    let metrics = [
        MetricConfiguration::new("table.row_count", Kwargs::new(), Kwargs::new()),
        MetricConfiguration::new("column.max", column.clone(), Kwargs::new()),
        MetricConfiguration::new("column.mean", column, Kwargs::new()),
    ];

    let before = engine.round_trips();
    let resolved = engine
        .resolve_metrics(&metrics, &MetricValues::new())
        .await
        .unwrap();
    assert_eq!(engine.round_trips() - before, 1);

    assert_eq!(resolved[&metrics[0].id()].as_count(), Some(5));
    assert_eq!(resolved[&metrics[1].id()].as_json(), Some(&json!(5)));
    assert_eq!(resolved[&metrics[2].id()].as_json(), Some(&json!(3.0)));
}

#[tokio::test]
async fn test_not_null_reports_row_positions() {
    let validator = validator_with(json!([
        {"a": 1}, {"a": null}, {"a": 3}, {"a": null}, {"a": 5}
    ]))
    .await;

    let configuration = ExpectationConfiguration::new(
        "expect_column_values_to_not_be_null",
        Kwargs::new().with("column", "a").with("mostly", 0.6),
    );
    let result = validator
        .validate_expectation(&configuration, Some(&complete()))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.result["unexpected_count"], json!(2));
    assert_eq!(result.result["unexpected_index_list"], json!([1, 3]));
    assert_eq!(result.result["unexpected_list"], json!([null, null]));
}

#[tokio::test]
async fn test_unique_window_condition() {
    let validator = validator_with(json!([
        {"a": 1}, {"a": 2}, {"a": 2}, {"a": 3}, {"a": null}
    ]))
    .await;

    let configuration = ExpectationConfiguration::new(
        "expect_column_values_to_be_unique",
        Kwargs::new().with("column", "a"),
    );
    let result = validator
        .validate_expectation(&configuration, Some(&complete()))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.result["element_count"], json!(5));
    assert_eq!(result.result["missing_count"], json!(1));
    assert_eq!(result.result["unexpected_count"], json!(2));
    assert_eq!(result.result["unexpected_list"], json!([2, 2]));
    assert_eq!(result.result["unexpected_index_list"], json!([1, 2]));
}

#[tokio::test]
async fn test_spark_row_condition() {
    let validator = validator_with(json!([
        {"a": 50, "g": 1}, {"a": 5, "g": 2}, {"a": 7, "g": 2}
    ]))
    .await;

    let configuration = ExpectationConfiguration::new(
        "expect_column_values_to_be_between",
        Kwargs::new()
            .with("column", "a")
            .with("min_value", 0)
            .with("max_value", 10)
            .with("row_condition", "g = 2")
            .with("condition_parser", "spark"),
    );
    let result = validator
        .validate_expectation(&configuration, None)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.result["element_count"], json!(2));
}

#[tokio::test]
async fn test_csv_batch_with_regex() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codes.csv");
    std::fs::write(&path, "code\nAB-1\nAB-2\nzz\n").unwrap();

    let mut validator = Validator::new(FrameExecutionEngine::new());
    validator.load_batch(BatchSpec::path(&path)).await.unwrap();

    let configuration = ExpectationConfiguration::new(
        "expect_column_values_to_match_regex",
        Kwargs::new().with("column", "code").with("regex", "^AB-\\d$"),
    );
    let result = validator
        .validate_expectation(&configuration, None)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.result["partial_unexpected_list"], json!(["zz"]));
}

#[tokio::test]
async fn test_nan_is_missing_for_map_conditions() {
    let frame = polars::df!("a" => [Some(f64::NAN), Some(f64::NAN), Some(1.0), Some(7.0), None])
        .unwrap();
    let mut validator = Validator::new(FrameExecutionEngine::new());
    validator
        .load_batch(BatchSpec::dataframe(frame))
        .await
        .unwrap();

    let between = ExpectationConfiguration::new(
        "expect_column_values_to_be_between",
        Kwargs::new()
            .with("column", "a")
            .with("min_value", 0)
            .with("max_value", 5),
    );
    let in_set = ExpectationConfiguration::new(
        "expect_column_values_to_be_in_set",
        Kwargs::new().with("column", "a").with("value_set", json!([1.0, 2.0])),
    );

    for configuration in [between, in_set] {
        let result = validator
            .validate_expectation(&configuration, None)
            .await
            .unwrap();
        assert!(!result.success, "{}", configuration.expectation_type);
        assert_eq!(result.result["element_count"], json!(5));
        assert_eq!(result.result["missing_count"], json!(3));
        assert_eq!(result.result["unexpected_count"], json!(1));
        assert_eq!(result.result["partial_unexpected_list"], json!([7.0]));
    }
}

#[tokio::test]
async fn test_json_expectations() {
    let validator = validator_with(json!([
        {"doc": "{\"id\": 1}"},
        {"doc": "[1, 2"},
        {"doc": "{\"id\": \"x\"}"},
        {"doc": null}
    ]))
    .await;

    let parseable = ExpectationConfiguration::new(
        "expect_column_values_to_be_json_parseable",
        Kwargs::new().with("column", "doc"),
    );
    let result = validator
        .validate_expectation(&parseable, Some(&complete()))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.result["missing_count"], json!(1));
    assert_eq!(result.result["unexpected_index_list"], json!([1]));

    let schema = ExpectationConfiguration::new(
        "expect_column_values_to_match_json_schema",
        Kwargs::new().with("column", "doc").with(
            "json_schema",
            json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "integer"}}}),
        ),
    );
    let result = validator
        .validate_expectation(&schema, Some(&complete()))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.result["unexpected_count"], json!(2));
    assert_eq!(result.result["unexpected_index_list"], json!([1, 2]));
}

#[tokio::test]
async fn test_column_partition() {
    let validator = validator_with(json!([{"a": 1}, {"a": null}, {"a": 9}])).await;

    let metric = MetricConfiguration::new(
        "column.partition",
        Kwargs::new().with("column", "a"),
        Kwargs::new().with("n_bins", 4),
    );
    let resolved = validator
        .engine()
        .resolve_metrics(std::slice::from_ref(&metric), &MetricValues::new())
        .await
        .unwrap();
    assert_eq!(
        resolved[&metric.id()].as_json(),
        Some(&json!([1.0, 3.0, 5.0, 7.0, 9.0]))
    );
}
