//! Analysis library for container resource usage
//!
//! This crate provides the core functionality for:
//! - Entity-keyed time series built from metric samples
//! - Ratio and threshold rule evaluation with consecutive-overtime detection
//! - Percentile-based request/limit sizing
//! - Observability (metrics and structured run events)

pub mod error;
pub mod models;
pub mod observability;
pub mod rules;
pub mod series;
pub mod sizing;
pub mod source;

pub use error::{AnalysisError, Result};
pub use models::*;
pub use observability::{render_metrics, AnalyzerMetrics, StructuredLogger};
pub use rules::{
    Compare, EvaluationConfig, LimitSource, RatioRuleEvaluator, RuleDefinition, RuleDocument,
    RuleEvaluation,
};
pub use series::EntityKeyedSeries;
pub use sizing::{PercentileSizingCalculator, SizingConfig};
pub use source::{SampleSource, StaticSource};
