//! Scenario tests for rule evaluation
//!
//! These build small multi-entity windows and run them through the rule
//! document, the evaluator and the overtime detector together.

use crate::error::AnalysisError;
use crate::models::{EntityKey, MetricSample, MEMORY_BYTE_COLUMN, MEMORY_LIMIT_BYTE_COLUMN};
use crate::rules::{
    apply_limit_pct_override, Compare, EvaluationConfig, LimitSource, RatioRuleEvaluator,
    RuleDefinition, RuleDocument,
};
use crate::series::EntityKeyedSeries;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn memory_sample(
    minute: i64,
    namespace: &str,
    pod: &str,
    used: Option<f64>,
    limit: Option<f64>,
) -> MetricSample {
    MetricSample::new(t0() + Duration::minutes(minute))
        .with_label("namespace", namespace)
        .with_label("container", "app")
        .with_label("pod", pod)
        .with_value(MEMORY_BYTE_COLUMN, used)
        .with_value(MEMORY_LIMIT_BYTE_COLUMN, limit)
}

fn dims() -> Vec<String> {
    vec!["container".to_string(), "pod".to_string()]
}

/// Two pods of one container over ten minutes, `app-1` above 80% of its
/// limit at minutes 3, 4 and 5
fn ten_minute_window() -> EntityKeyedSeries {
    let mut samples = Vec::new();
    for minute in 0..10 {
        let hot = (3..=5).contains(&minute);
        let used = if hot { 900.0 } else { 500.0 };
        samples.push(memory_sample(minute, "prod", "app-1", Some(used), Some(1000.0)));
        samples.push(memory_sample(minute, "prod", "app-2", Some(400.0), Some(1000.0)));
    }
    EntityKeyedSeries::from_samples(&dims(), samples).unwrap()
}

fn memory_ratio_rule(pct: f64) -> RuleDefinition {
    RuleDefinition::new(
        MEMORY_BYTE_COLUMN,
        LimitSource::Column(MEMORY_LIMIT_BYTE_COLUMN.to_string()),
        Some(pct),
        Compare::Greater,
    )
    .unwrap()
}

fn evaluator() -> RatioRuleEvaluator {
    RatioRuleEvaluator::new(EvaluationConfig::default()).unwrap()
}

#[test]
fn test_three_minute_memory_overtime() {
    let evaluation = evaluator()
        .evaluate(&memory_ratio_rule(0.8), &ten_minute_window())
        .unwrap();

    assert_eq!(evaluation.records.len(), 1);
    let record = &evaluation.records[0];
    assert_eq!(record.entity, EntityKey::new(["app", "app-1"]));
    assert_eq!(record.violation_count, 3);
    assert_eq!(record.valid_samples, 10);
    assert_eq!(record.violation_pct, 30.0);
    assert_eq!(record.max_consecutive_secs, Some(120.0));
    assert_eq!(record.delta, None);

    assert_eq!(evaluation.unique_limits(), vec![1000.0]);
    assert!(evaluation.missing_limits.is_empty());
    assert_eq!(evaluation.violations.axis().len(), 10);
    assert_eq!(
        evaluation
            .violations
            .violation_count(&EntityKey::new(["app", "app-2"])),
        0
    );
}

#[test]
fn test_greater_is_strict_at_boundary() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(100.0), None),
        memory_sample(1, "prod", "app-1", Some(100.000001), None),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();
    let rule = RuleDefinition::new(
        MEMORY_BYTE_COLUMN,
        LimitSource::Fixed(100.0),
        None,
        Compare::Greater,
    )
    .unwrap();

    let evaluation = evaluator().evaluate(&rule, &data).unwrap();
    assert_eq!(evaluation.records.len(), 1);
    assert_eq!(evaluation.records[0].violation_count, 1);
    assert_eq!(evaluation.records[0].violation_pct, 50.0);
    // one violating sample spans 0 seconds and is left out
    assert_eq!(evaluation.records[0].max_consecutive_secs, None);
}

#[test]
fn test_ratio_boundary_is_not_a_violation() {
    let samples = vec![memory_sample(0, "prod", "app-1", Some(800.0), Some(1000.0))];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();

    let evaluation = evaluator().evaluate(&memory_ratio_rule(0.8), &data).unwrap();
    assert!(!evaluation.has_violations());
}

#[test]
fn test_missing_limits_are_reported_not_evaluated() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(900.0), None),
        memory_sample(1, "prod", "app-1", Some(700.0), None),
        memory_sample(0, "prod", "app-2", Some(900.0), Some(1000.0)),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();

    let evaluation = evaluator().evaluate(&memory_ratio_rule(0.8), &data).unwrap();
    assert_eq!(evaluation.records.len(), 1);
    assert_eq!(evaluation.records[0].entity, EntityKey::new(["app", "app-2"]));

    assert_eq!(evaluation.missing_limits.len(), 1);
    let missing = &evaluation.missing_limits[0];
    assert_eq!(missing.entity, EntityKey::new(["app", "app-1"]));
    assert_eq!(missing.value_count, 2);
    assert_eq!(missing.mean_value, Some(800.0));
}

#[test]
fn test_partially_missing_limit_resolves_to_known_value() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(900.0), None),
        memory_sample(1, "prod", "app-1", Some(900.0), Some(1000.0)),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();

    let evaluation = evaluator().evaluate(&memory_ratio_rule(0.8), &data).unwrap();
    assert_eq!(evaluation.records[0].violation_count, 2);
    assert_eq!(evaluation.records[0].max_consecutive_secs, Some(60.0));
}

#[test]
fn test_inconsistent_limit_is_fatal() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(500.0), Some(1000.0)),
        memory_sample(1, "prod", "app-1", Some(500.0), Some(2000.0)),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();

    let err = evaluator()
        .evaluate(&memory_ratio_rule(0.8), &data)
        .unwrap_err();
    assert!(err.is_data_integrity());
    assert!(matches!(
        err,
        AnalysisError::InconsistentLimit { first, second, .. } if first == 1000.0 && second == 2000.0
    ));
}

#[test]
fn test_delta_collapses_window() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(100.0), None),
        memory_sample(5, "prod", "app-1", Some(450.0), None),
        memory_sample(9, "prod", "app-1", Some(300.0), None),
        memory_sample(0, "prod", "app-2", Some(100.0), None),
        memory_sample(9, "prod", "app-2", Some(150.0), None),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();
    let rule = RuleDefinition::new(
        MEMORY_BYTE_COLUMN,
        LimitSource::Fixed(200.0),
        None,
        Compare::Delta,
    )
    .unwrap();

    let evaluation = evaluator().evaluate(&rule, &data).unwrap();
    assert_eq!(evaluation.records.len(), 1);
    let record = &evaluation.records[0];
    assert_eq!(record.entity, EntityKey::new(["app", "app-1"]));
    assert_eq!(record.delta, Some(350.0));
    assert_eq!(record.violation_count, 1);
    assert_eq!(record.violation_pct, 100.0);
    assert_eq!(record.max_consecutive_secs, None);
}

#[test]
fn test_delta_with_limit_column_is_rejected() {
    let err = RuleDefinition::new(
        MEMORY_BYTE_COLUMN,
        LimitSource::Column(MEMORY_LIMIT_BYTE_COLUMN.to_string()),
        Some(0.8),
        Compare::Delta,
    )
    .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_missing_grouping_column_is_configuration_error() {
    let rule = memory_ratio_rule(0.8).with_group_by(&["container", "node"]);
    let err = evaluator().evaluate(&rule, &ten_minute_window()).unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, AnalysisError::MissingColumn { ref column, .. } if column == "node"));
}

#[test]
fn test_missing_resource_column_is_configuration_error() {
    let rule = RuleDefinition::new("GPU_CORE", LimitSource::Fixed(1.0), None, Compare::Greater)
        .unwrap();
    let err = evaluator().evaluate(&rule, &ten_minute_window()).unwrap_err();
    assert!(matches!(err, AnalysisError::MissingColumn { ref column, .. } if column == "GPU_CORE"));
}

#[test]
fn test_group_by_subset_rekeys_records() {
    let rule = memory_ratio_rule(0.8).with_group_by(&["pod"]);
    let evaluation = evaluator().evaluate(&rule, &ten_minute_window()).unwrap();
    assert_eq!(evaluation.dimensions, vec!["pod".to_string()]);
    assert_eq!(evaluation.records[0].entity, EntityKey::new(["app-1"]));
}

#[test]
fn test_min_run_length_suppresses_short_runs() {
    let config = EvaluationConfig {
        min_run_length: 4,
        include_zero_spans: false,
    };
    let evaluation = RatioRuleEvaluator::new(config)
        .unwrap()
        .evaluate(&memory_ratio_rule(0.8), &ten_minute_window())
        .unwrap();
    // counts are unaffected, only the duration disappears
    assert_eq!(evaluation.records[0].violation_count, 3);
    assert_eq!(evaluation.records[0].max_consecutive_secs, None);
}

#[test]
fn test_per_namespace_evaluation() {
    let mut samples = Vec::new();
    for minute in 0..4 {
        samples.push(memory_sample(minute, "prod", "app-1", Some(950.0), Some(1000.0)));
        samples.push(memory_sample(minute, "stage", "app-1", Some(100.0), Some(1000.0)));
    }
    let all_dims = vec![
        "namespace".to_string(),
        "container".to_string(),
        "pod".to_string(),
    ];
    let data = EntityKeyedSeries::from_samples(&all_dims, samples).unwrap();
    let rule = memory_ratio_rule(0.8);

    let per_namespace = data.split_by("namespace").unwrap();
    let prod = evaluator().evaluate(&rule, &per_namespace["prod"]).unwrap();
    let stage = evaluator().evaluate(&rule, &per_namespace["stage"]).unwrap();

    assert_eq!(prod.records.len(), 1);
    assert_eq!(prod.records[0].max_consecutive_secs, Some(180.0));
    assert!(stage.records.is_empty());
}

#[test]
fn test_rule_document_with_selective_override() {
    let document = RuleDocument::from_json(
        r#"{
            "name": "memory-sla",
            "tableName": "memory",
            "groupBy": ["pod", " container "],
            "rules": [
                {"resource": "MEMORY_BYTE", "resource_limit_column": "MEMORY_LIMIT_BYTE",
                 "limit_pct": 0.95, "compare": "GREATER"},
                {"resource": "MEMORY_BYTE", "resource_limit_column": "MEMORY_LIMIT_BYTE",
                 "compare": ">"},
                {"resource": "MEMORY_BYTE", "compare": ">"}
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(document.group_keys(), dims());

    let results = document.validated_rules();
    assert!(results[2].is_err());
    let mut rules: Vec<RuleDefinition> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(apply_limit_pct_override(&mut rules, 0.8), 1);
    assert_eq!(rules[0].limit_pct, Some(0.8));
    assert_eq!(rules[1].limit_pct, None);

    let data = ten_minute_window();
    let first = evaluator().evaluate(&rules[0], &data).unwrap();
    assert_eq!(first.records[0].violation_count, 3);
    // without a percentage every positive usage violates
    let second = evaluator().evaluate(&rules[1], &data).unwrap();
    assert_eq!(second.records.len(), 2);
    assert!(second.records.iter().all(|r| r.violation_pct == 100.0));
    assert!(second.records.iter().all(|r| r.max_consecutive_secs == Some(540.0)));
}

#[test]
fn test_evaluation_serializes_without_flag_series() {
    let evaluation = evaluator()
        .evaluate(&memory_ratio_rule(0.8), &ten_minute_window())
        .unwrap();
    let json = serde_json::to_value(&evaluation).unwrap();
    assert!(json.get("violations").is_none());
    assert_eq!(json["records"][0]["violation_count"], 3);
    assert_eq!(json["rule"]["resource_limit_column"], "MEMORY_LIMIT_BYTE");
}

/// `app-1` above 80% at minutes 3 to 5, `app-2` at minutes 5 to 7
fn overlapping_window() -> EntityKeyedSeries {
    let mut samples = Vec::new();
    for minute in 0..10 {
        let first = if (3..=5).contains(&minute) { 900.0 } else { 500.0 };
        let second = if (5..=7).contains(&minute) { 900.0 } else { 400.0 };
        samples.push(memory_sample(minute, "prod", "app-1", Some(first), Some(1000.0)));
        samples.push(memory_sample(minute, "prod", "app-2", Some(second), Some(1000.0)));
    }
    EntityKeyedSeries::from_samples(&dims(), samples).unwrap()
}

#[test]
fn test_coarser_group_by_aggregates_members() {
    let rule = memory_ratio_rule(0.8).with_group_by(&["container"]);
    let evaluation = evaluator().evaluate(&rule, &overlapping_window()).unwrap();

    assert_eq!(evaluation.dimensions, vec!["container".to_string()]);
    assert_eq!(evaluation.records.len(), 1);
    let record = &evaluation.records[0];
    assert_eq!(record.entity, EntityKey::new(["app"]));
    assert_eq!(record.valid_samples, 20);
    assert_eq!(record.violation_count, 6);
    assert_eq!(record.violation_pct, 30.0);
    // minutes 3 to 7 violate in at least one pod
    assert_eq!(record.max_consecutive_secs, Some(240.0));
    assert_eq!(evaluation.unique_limits(), vec![1000.0]);
}

#[test]
fn test_coarser_group_by_merges_missing_limits() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(900.0), None),
        memory_sample(1, "prod", "app-1", Some(700.0), None),
        memory_sample(0, "prod", "app-3", Some(800.0), None),
        memory_sample(0, "prod", "app-2", Some(900.0), Some(1000.0)),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();
    let rule = memory_ratio_rule(0.8).with_group_by(&["container"]);

    let evaluation = evaluator().evaluate(&rule, &data).unwrap();
    assert_eq!(evaluation.records.len(), 1);
    assert_eq!(evaluation.records[0].valid_samples, 1);

    assert_eq!(evaluation.missing_limits.len(), 1);
    let missing = &evaluation.missing_limits[0];
    assert_eq!(missing.entity, EntityKey::new(["app"]));
    assert_eq!(missing.value_count, 3);
    assert_eq!(missing.mean_value, Some(800.0));
}

#[test]
fn test_coarser_group_by_delta_spans_members() {
    let samples = vec![
        memory_sample(0, "prod", "app-1", Some(100.0), None),
        memory_sample(9, "prod", "app-1", Some(150.0), None),
        memory_sample(0, "prod", "app-2", Some(250.0), None),
        memory_sample(9, "prod", "app-2", Some(260.0), None),
    ];
    let data = EntityKeyedSeries::from_samples(&dims(), samples).unwrap();
    let rule = RuleDefinition::new(
        MEMORY_BYTE_COLUMN,
        LimitSource::Fixed(100.0),
        None,
        Compare::Delta,
    )
    .unwrap()
    .with_group_by(&["container"]);

    let evaluation = evaluator().evaluate(&rule, &data).unwrap();
    assert_eq!(evaluation.records.len(), 1);
    assert_eq!(evaluation.records[0].delta, Some(160.0));
}
