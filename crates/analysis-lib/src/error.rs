//! Error types for rule evaluation and sizing
//!
//! Errors fall into two classes. Configuration errors are raised before any
//! computation starts. Data-integrity errors mean the input cannot produce a
//! trustworthy result. Sparse data is never an error: entities without
//! enough samples are simply absent from the output.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("{resource}: exactly one of resource_limit_value or resource_limit_column must be set")]
    LimitSource { resource: String },

    #[error("unknown compare operator: {0}")]
    UnknownCompare(String),

    #[error("{resource}: compare operator delta needs a fixed resource_limit_value")]
    DeltaRequiresFixedLimit { resource: String },

    #[error("column '{column}' not found, available: {available:?}")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot parse labels '{text}': {reason}")]
    LabelParse { text: String, reason: String },

    #[error("duplicate sample for entity {entity} at {timestamp}")]
    DuplicateSample {
        entity: String,
        timestamp: DateTime<Utc>,
    },

    #[error("cannot load samples from {source_name}: {reason}")]
    Source { source_name: String, reason: String },

    #[error("{column}: entity {entity} has inconsistent values {first} and {second} in one window")]
    InconsistentLimit {
        column: String,
        entity: String,
        first: f64,
        second: f64,
    },
}

impl AnalysisError {
    /// Errors caused by rule or settings definitions
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AnalysisError::LimitSource { .. }
                | AnalysisError::UnknownCompare(_)
                | AnalysisError::DeltaRequiresFixedLimit { .. }
                | AnalysisError::MissingColumn { .. }
                | AnalysisError::InvalidConfig(_)
                | AnalysisError::LabelParse { .. }
        )
    }

    /// Errors caused by the input table itself
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            AnalysisError::DuplicateSample { .. } | AnalysisError::InconsistentLimit { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = AnalysisError::UnknownCompare(">=".to_string());
        assert!(err.is_configuration());
        assert!(!err.is_data_integrity());

        let err = AnalysisError::DuplicateSample {
            entity: "app/pod-1".to_string(),
            timestamp: Utc::now(),
        };
        assert!(err.is_data_integrity());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_message_names_the_rule() {
        let err = AnalysisError::LimitSource {
            resource: "cpu".to_string(),
        };
        assert!(err.to_string().starts_with("cpu:"));
    }

    #[test]
    fn test_source_errors_are_neither_class() {
        let err = AnalysisError::Source {
            source_name: "window.json".to_string(),
            reason: "no such file".to_string(),
        };
        assert!(!err.is_configuration());
        assert!(!err.is_data_integrity());
    }
}
