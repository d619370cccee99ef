//! Rule evaluation command

use analysis_lib::rules::{apply_limit_pct_override, RuleEvaluation};
use analysis_lib::source::SampleSource;
use analysis_lib::{AnalysisError, EntityKeyedSeries, RatioRuleEvaluator, RuleDefinition};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tabled::Tabled;
use tracing::debug;

use super::{select_namespaces, time_range, RunContext};
use crate::input::{label_dimensions, read_rule_document, JsonFileSource};
use crate::output::{
    color_pct, format_duration, print_heading, print_info, print_json, print_table,
    print_warning, OutputFormat,
};

/// Arguments of `rightsize evaluate`
pub struct EvaluateArgs {
    pub rules: PathBuf,
    pub data: PathBuf,
    pub namespace: Option<String>,
    pub limit_pct: Option<f64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub delta_hours: Option<f64>,
}

/// Outcome of one rule in one namespace
#[derive(Serialize)]
struct RuleOutcome {
    namespace: String,
    rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    evaluation: Option<RuleEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Row for the violation table
#[derive(Tabled)]
struct ViolationRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Violations")]
    violations: usize,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Violation %")]
    pct: String,
    #[tabled(rename = "Longest")]
    longest: String,
    #[tabled(rename = "Delta")]
    delta: String,
}

/// Row for the missing-limit table
#[derive(Tabled)]
struct MissingLimitRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Mean value")]
    mean: String,
}

/// Evaluate every rule of a document per namespace
///
/// Returns the number of rules that failed to load or evaluate. A
/// data-integrity error in any namespace aborts the whole run.
pub async fn run(ctx: &RunContext, args: EvaluateArgs) -> Result<usize> {
    let document = read_rule_document(&args.rules)?;
    let range = time_range(args.start, args.end, args.delta_hours, &ctx.settings)?;
    ctx.logger.log_run_started(
        "evaluate",
        &range.map(|r| r.to_string()).unwrap_or_else(|| "all".to_string()),
    );

    let mut outcomes = Vec::new();
    let mut rules: Vec<RuleDefinition> = Vec::new();
    for (idx, rule) in document.validated_rules().into_iter().enumerate() {
        match rule {
            Ok(rule) => rules.push(rule),
            Err(err) => {
                let name = format!("{}#{}", document.name, idx);
                ctx.logger.log_rule_failed("*", &name, &err.to_string());
                ctx.metrics.inc_rule_failures();
                outcomes.push(RuleOutcome {
                    namespace: "*".to_string(),
                    rule: name,
                    evaluation: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }
    if let Some(limit_pct) = args.limit_pct {
        let changed = apply_limit_pct_override(&mut rules, limit_pct);
        debug!(limit_pct, changed, "Applied limit_pct override");
    }

    let source = JsonFileSource::new(&args.data);
    let samples = source.load(range.as_ref()).await?;
    let mut dimensions = document.group_keys();
    if dimensions.is_empty() {
        dimensions = label_dimensions(&samples);
    }
    let series = EntityKeyedSeries::from_samples(&dimensions, samples)
        .with_context(|| format!("Invalid data in {}", source.name()))?;

    let namespace = args
        .namespace
        .as_deref()
        .or(ctx.settings.default_namespace.as_deref());
    let namespaces = select_namespaces(&series, namespace)?;

    let evaluator = Arc::new(RatioRuleEvaluator::new(ctx.settings.evaluation)?);
    let mut tasks = Vec::new();
    for (namespace, series) in namespaces {
        let series = Arc::new(series);
        for rule in &rules {
            let evaluator = Arc::clone(&evaluator);
            let series = Arc::clone(&series);
            let rule = rule.clone();
            let namespace = namespace.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let result = evaluator.evaluate(&rule, &series);
                (namespace, rule, result, started.elapsed().as_secs_f64())
            }));
        }
    }

    for task in tasks {
        let (namespace, rule, result, elapsed) = task.await.context("Evaluation task panicked")?;
        match result {
            Err(err) if err.is_data_integrity() => {
                ctx.logger.log_rule_failed(&namespace, &rule.to_string(), &err.to_string());
                return Err(err).with_context(|| format!("Rule {rule} in namespace {namespace}"));
            }
            result => outcomes.push(record_outcome(ctx, namespace, &rule, result, elapsed)),
        }
    }

    let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
    match ctx.format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Table => print_outcomes(&outcomes),
    }
    Ok(failures)
}

fn record_outcome(
    ctx: &RunContext,
    namespace: String,
    rule: &RuleDefinition,
    result: std::result::Result<RuleEvaluation, AnalysisError>,
    elapsed: f64,
) -> RuleOutcome {
    let name = rule.to_string();
    match result {
        Ok(evaluation) => {
            ctx.metrics.observe_evaluation_latency(elapsed);
            ctx.metrics.record_evaluation(evaluation.records.len());
            ctx.metrics
                .set_missing_limit_entities(evaluation.missing_limits.len() as i64);
            if !evaluation.missing_limits.is_empty() {
                ctx.logger
                    .log_missing_limits(&namespace, &name, evaluation.missing_limits.len());
            }
            ctx.logger
                .log_rule_evaluated(&namespace, &name, &evaluation.records);
            RuleOutcome {
                namespace,
                rule: name,
                evaluation: Some(evaluation),
                error: None,
            }
        }
        Err(err) => {
            ctx.metrics.inc_rule_failures();
            ctx.logger.log_rule_failed(&namespace, &name, &err.to_string());
            RuleOutcome {
                namespace,
                rule: name,
                evaluation: None,
                error: Some(err.to_string()),
            }
        }
    }
}

fn print_outcomes(outcomes: &[RuleOutcome]) {
    for outcome in outcomes {
        print_heading(&format!("{} | {}", outcome.namespace, outcome.rule));
        if let Some(error) = &outcome.error {
            print_warning(&format!("rule skipped: {}", error));
            continue;
        }
        let Some(evaluation) = &outcome.evaluation else {
            continue;
        };

        println!("Entity: {}", evaluation.dimensions.join("/").cyan());
        let limits = evaluation.unique_limits();
        if !limits.is_empty() {
            print_info(&format!("limits: {:?}", limits));
        }

        let rows: Vec<ViolationRow> = evaluation
            .records
            .iter()
            .map(|r| ViolationRow {
                entity: r.entity.to_string(),
                violations: r.violation_count,
                samples: r.valid_samples,
                pct: color_pct(r.violation_pct),
                longest: r
                    .max_consecutive_secs
                    .map(format_duration)
                    .unwrap_or_else(|| "-".to_string()),
                delta: r
                    .delta
                    .map(|d| format!("{:.3}", d))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        print_table(&rows, "No violations");

        if !evaluation.missing_limits.is_empty() {
            print_warning("entities without limit, not evaluated:");
            let rows: Vec<MissingLimitRow> = evaluation
                .missing_limits
                .iter()
                .map(|m| MissingLimitRow {
                    entity: m.entity.to_string(),
                    samples: m.value_count,
                    mean: m
                        .mean_value
                        .map(|v| format!("{:.3}", v))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_table(&rows, "");
        }
    }
}
