//! Ratio and threshold rule evaluation
//!
//! For each entity the evaluator resolves the limit, flags violating
//! samples, aggregates counts and hands the per-sample flags to the
//! [`OvertimeDetector`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::overtime::{OvertimeDetector, ViolationSeries};
use super::rule::{Compare, LimitSource, RuleDefinition};
use crate::error::{AnalysisError, Result};
use crate::models::{EntityKey, ViolationRecord};
use crate::series::EntityKeyedSeries;

/// Evaluation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Minimum consecutive violating samples for a duration to be reported
    pub min_run_length: usize,
    /// Report single-sample runs with a 0 second duration
    pub include_zero_spans: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_run_length: 1,
            include_zero_spans: false,
        }
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_run_length == 0 {
            return Err(AnalysisError::InvalidConfig(
                "min_run_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolved limit of one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityLimit {
    pub entity: EntityKey,
    pub limit: f64,
}

/// Entity whose limit column is missing in every sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingLimit {
    pub entity: EntityKey,
    /// Non-missing resource values of the entity
    pub value_count: usize,
    pub mean_value: Option<f64>,
}

/// Full outcome of evaluating one rule against one series
#[derive(Debug, Clone, Serialize)]
pub struct RuleEvaluation {
    pub rule: RuleDefinition,
    /// Dimension names of every record's entity key
    pub dimensions: Vec<String>,
    pub records: Vec<ViolationRecord>,
    #[serde(skip)]
    pub violations: ViolationSeries,
    /// Per-entity limits of column rules
    pub limits: Vec<EntityLimit>,
    pub missing_limits: Vec<MissingLimit>,
}

impl RuleEvaluation {
    pub fn has_violations(&self) -> bool {
        !self.records.is_empty()
    }

    /// Distinct limit values across entities, ascending
    pub fn unique_limits(&self) -> Vec<f64> {
        let mut limits: Vec<f64> = self.limits.iter().map(|l| l.limit).collect();
        limits.sort_by(f64::total_cmp);
        limits.dedup();
        limits
    }
}

/// Per-group aggregation before records are built
#[derive(Default)]
struct EntityOutcome {
    valid_samples: usize,
    violation_count: usize,
    /// Timestamps where at least one member violates
    violating: BTreeSet<DateTime<Utc>>,
}

impl EntityOutcome {
    fn absorb(&mut self, member: EntityOutcome) {
        self.valid_samples += member.valid_samples;
        self.violation_count += member.violation_count;
        self.violating.extend(member.violating);
    }
}

/// Evaluates [`RuleDefinition`]s against an [`EntityKeyedSeries`]
#[derive(Debug, Clone)]
pub struct RatioRuleEvaluator {
    detector: OvertimeDetector,
}

impl RatioRuleEvaluator {
    pub fn new(config: EvaluationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector: OvertimeDetector::new(config.min_run_length)
                .with_zero_spans(config.include_zero_spans),
        })
    }

    /// Evaluate one rule
    ///
    /// Fails before any computation when the rule references a column or
    /// grouping key the series does not have. A `group_by` coarser than the
    /// series dimensions aggregates the member entities of each group.
    pub fn evaluate(
        &self,
        rule: &RuleDefinition,
        series: &EntityKeyedSeries,
    ) -> Result<RuleEvaluation> {
        let (dimensions, groups) = match &rule.group_by {
            Some(keys) => (keys.clone(), series.group_members(keys)?),
            None => (
                series.dimensions().to_vec(),
                series
                    .entities()
                    .map(|entity| (entity.clone(), vec![entity.clone()]))
                    .collect(),
            ),
        };
        let value_idx = series.column_index(&rule.resource)?;

        let mut evaluation = RuleEvaluation {
            rule: rule.clone(),
            dimensions,
            records: Vec::new(),
            violations: ViolationSeries::new(series.timestamps()),
            limits: Vec::new(),
            missing_limits: Vec::new(),
        };

        match (&rule.limit, rule.compare) {
            (LimitSource::Fixed(threshold), Compare::Delta) => {
                evaluation.records = self.evaluate_delta(series, &groups, value_idx, *threshold);
            }
            (LimitSource::Fixed(threshold), compare) => {
                let outcomes = groups
                    .iter()
                    .map(|(group, members)| {
                        let mut outcome = EntityOutcome::default();
                        for member in members {
                            outcome.absorb(fixed_outcome(series, member, value_idx, |v| {
                                compare.holds(v, *threshold)
                            }));
                        }
                        (group.clone(), outcome)
                    })
                    .collect();
                evaluation.records = self.finish(&mut evaluation.violations, outcomes);
            }
            (LimitSource::Column(column), compare) => {
                let limit_idx = series.column_index(column)?;
                let threshold = rule.ratio_threshold();
                let mut outcomes = BTreeMap::new();
                for (group, members) in &groups {
                    let mut outcome: Option<EntityOutcome> = None;
                    let mut unlimited: Option<Vec<f64>> = None;
                    for member in members {
                        match resolve_limit(series, member, column, limit_idx)? {
                            Some(limit) => {
                                let member_outcome =
                                    ratio_outcome(series, member, value_idx, limit, |r| {
                                        compare.holds(r, threshold)
                                    });
                                outcome
                                    .get_or_insert_with(EntityOutcome::default)
                                    .absorb(member_outcome);
                                evaluation.limits.push(EntityLimit {
                                    entity: group.clone(),
                                    limit,
                                });
                            }
                            None => {
                                debug!(entity = %member, "Limit missing in every sample");
                                unlimited
                                    .get_or_insert_with(Vec::new)
                                    .extend(present_values(series, member, value_idx));
                            }
                        }
                    }
                    if let Some(outcome) = outcome {
                        outcomes.insert(group.clone(), outcome);
                    }
                    if let Some(values) = unlimited {
                        evaluation
                            .missing_limits
                            .push(missing_limit(group.clone(), &values));
                    }
                }
                if !evaluation.missing_limits.is_empty() {
                    warn!(
                        rule = %rule,
                        entities = evaluation.missing_limits.len(),
                        "Entities without any {} value excluded",
                        column
                    );
                }
                evaluation.records = self.finish(&mut evaluation.violations, outcomes);
            }
        }

        info!(
            rule = %rule,
            entities = groups.len(),
            violating_entities = evaluation.records.len(),
            "Rule evaluated"
        );
        Ok(evaluation)
    }

    /// Collapse every group to `max - min` over the window
    fn evaluate_delta(
        &self,
        series: &EntityKeyedSeries,
        groups: &BTreeMap<EntityKey, Vec<EntityKey>>,
        value_idx: usize,
        threshold: f64,
    ) -> Vec<ViolationRecord> {
        groups
            .iter()
            .filter_map(|(group, members)| {
                let (min, max) = members
                    .iter()
                    .flat_map(|member| present_values(series, member, value_idx))
                    .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                        None => Some((v, v)),
                        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                    })?;
                let delta = max - min;
                debug!(entity = %group, delta, threshold, "Window delta");
                Compare::Delta
                    .holds(delta, threshold)
                    .then(|| ViolationRecord {
                        entity: group.clone(),
                        violation_count: 1,
                        valid_samples: 1,
                        violation_pct: 100.0,
                        max_consecutive_secs: None,
                        delta: Some(delta),
                    })
            })
            .collect()
    }

    fn finish(
        &self,
        violations: &mut ViolationSeries,
        outcomes: BTreeMap<EntityKey, EntityOutcome>,
    ) -> Vec<ViolationRecord> {
        for (entity, outcome) in &outcomes {
            violations.insert(entity.clone(), &outcome.violating);
        }
        let spans = self.detector.longest_violation_span(violations);

        outcomes
            .into_iter()
            .filter(|(_, o)| o.valid_samples > 0 && o.violation_count > 0)
            .map(|(entity, outcome)| {
                let max_consecutive_secs = spans.get(&entity).copied();
                ViolationRecord {
                    violation_pct: 100.0 * outcome.violation_count as f64
                        / outcome.valid_samples as f64,
                    entity,
                    violation_count: outcome.violation_count,
                    valid_samples: outcome.valid_samples,
                    max_consecutive_secs,
                    delta: None,
                }
            })
            .collect()
    }
}

fn present_values<'a>(
    series: &'a EntityKeyedSeries,
    entity: &EntityKey,
    value_idx: usize,
) -> impl Iterator<Item = f64> + 'a {
    series.column_values(entity, value_idx).filter_map(|(_, v)| v)
}

fn fixed_outcome(
    series: &EntityKeyedSeries,
    entity: &EntityKey,
    value_idx: usize,
    violates: impl Fn(f64) -> bool,
) -> EntityOutcome {
    let mut outcome = EntityOutcome::default();
    for (ts, value) in series.column_values(entity, value_idx) {
        let Some(value) = value else { continue };
        outcome.valid_samples += 1;
        if violates(value) {
            outcome.violation_count += 1;
            outcome.violating.insert(ts);
        }
    }
    outcome
}

fn ratio_outcome(
    series: &EntityKeyedSeries,
    entity: &EntityKey,
    value_idx: usize,
    limit: f64,
    violates: impl Fn(f64) -> bool,
) -> EntityOutcome {
    let mut outcome = EntityOutcome::default();
    for (ts, value) in series.column_values(entity, value_idx) {
        // 0/0 has no meaning and counts as missing, x/0 stays infinite
        let Some(ratio) = value.map(|v| v / limit).filter(|r| !r.is_nan()) else {
            continue;
        };
        outcome.valid_samples += 1;
        if violates(ratio) {
            outcome.violation_count += 1;
            outcome.violating.insert(ts);
        }
    }
    outcome
}

/// The single limit value of an entity, `None` when it is missing everywhere
fn resolve_limit(
    series: &EntityKeyedSeries,
    entity: &EntityKey,
    column: &str,
    limit_idx: usize,
) -> Result<Option<f64>> {
    let mut resolved: Option<f64> = None;
    for (_, limit) in series.column_values(entity, limit_idx) {
        let Some(limit) = limit else { continue };
        match resolved {
            None => resolved = Some(limit),
            Some(first) if first != limit => {
                return Err(AnalysisError::InconsistentLimit {
                    column: column.to_string(),
                    entity: entity.to_string(),
                    first,
                    second: limit,
                })
            }
            Some(_) => {}
        }
    }
    Ok(resolved)
}

fn missing_limit(entity: EntityKey, values: &[f64]) -> MissingLimit {
    let mean_value =
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
    MissingLimit {
        entity,
        value_count: values.len(),
        mean_value,
    }
}
