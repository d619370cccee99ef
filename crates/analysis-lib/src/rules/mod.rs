//! Rule evaluation
//!
//! This module checks threshold and ratio rules against an
//! [`EntityKeyedSeries`](crate::series::EntityKeyedSeries). A violation
//! record per entity carries counts, the violation percentage and the
//! longest continuous violation found by the overtime detector.

mod evaluator;
mod overtime;
mod rule;

#[cfg(test)]
mod tests;

pub use evaluator::{EntityLimit, EvaluationConfig, MissingLimit, RatioRuleEvaluator, RuleEvaluation};
pub use overtime::{OvertimeDetector, ViolationSeries};
pub use rule::{
    apply_limit_pct_override, normalize_group_keys, Compare, LimitSource, RuleDefinition,
    RuleDocument, RuleSpec,
};
