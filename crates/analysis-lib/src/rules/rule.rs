//! Rule definitions and rule documents
//!
//! A rule compares one resource column either against a fixed value or,
//! as a ratio, against a per-entity limit column.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AnalysisError, Result};

/// Comparison applied by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compare {
    Greater,
    Less,
    Equal,
    /// `max - min` over the whole window exceeds the threshold
    Delta,
}

impl Compare {
    /// Whether `value` violates `threshold`
    ///
    /// For [`Compare::Delta`] `value` is the already collapsed window delta.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Greater | Self::Delta => value > threshold,
            Self::Less => value < threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Greater => ">",
            Self::Less => "<",
            Self::Equal => "=",
            Self::Delta => "delta",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Greater => "GREATER",
            Self::Less => "LESS",
            Self::Equal => "EQUAL",
            Self::Delta => "DELTA",
        }
    }
}

impl FromStr for Compare {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            ">" | "greater" | "gt" => Ok(Self::Greater),
            "<" | "less" | "lt" => Ok(Self::Less),
            "=" | "==" | "equal" | "eq" => Ok(Self::Equal),
            "delta" => Ok(Self::Delta),
            _ => Err(AnalysisError::UnknownCompare(s.to_string())),
        }
    }
}

impl TryFrom<String> for Compare {
    type Error = AnalysisError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Compare> for String {
    fn from(compare: Compare) -> Self {
        compare.symbol().to_string()
    }
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Where the threshold of a rule comes from
#[derive(Debug, Clone, PartialEq)]
pub enum LimitSource {
    /// Scalar broadcast to every sample
    Fixed(f64),
    /// Per-sample limit column, compared as `value / limit`
    Column(String),
}

/// Rule as written in a rule document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limit_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limit_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_pct: Option<f64>,
    #[serde(default = "default_compare")]
    pub compare: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
}

fn default_compare() -> String {
    Compare::Greater.symbol().to_string()
}

/// Validated rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleSpec", into = "RuleSpec")]
pub struct RuleDefinition {
    /// Resource column the rule checks
    pub resource: String,
    pub limit: LimitSource,
    /// Fractional threshold for ratio rules, `None` = not set
    pub limit_pct: Option<f64>,
    pub compare: Compare,
    /// Entity dimensions to aggregate by, `None` = all dimensions
    pub group_by: Option<Vec<String>>,
}

impl RuleDefinition {
    pub fn new(
        resource: impl Into<String>,
        limit: LimitSource,
        limit_pct: Option<f64>,
        compare: Compare,
    ) -> Result<Self> {
        let rule = Self {
            resource: resource.into(),
            limit,
            limit_pct,
            compare,
            group_by: None,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn with_group_by(mut self, keys: &[&str]) -> Self {
        self.group_by = Some(normalize_group_keys(keys.iter().map(|k| k.to_string())));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.resource.trim().is_empty() {
            return Err(AnalysisError::InvalidConfig("rule without resource".to_string()));
        }
        match (&self.limit, self.compare) {
            (LimitSource::Column(_), Compare::Delta) => {
                return Err(AnalysisError::DeltaRequiresFixedLimit {
                    resource: self.resource.clone(),
                })
            }
            (LimitSource::Fixed(value), _) if !value.is_finite() => {
                return Err(AnalysisError::InvalidConfig(format!(
                    "{}: resource_limit_value must be finite",
                    self.resource
                )))
            }
            _ => {}
        }
        if self.limit_pct.is_some_and(|pct| !pct.is_finite()) {
            return Err(AnalysisError::InvalidConfig(format!(
                "{}: limit_pct must be finite",
                self.resource
            )));
        }
        Ok(())
    }

    /// Threshold applied to ratios, an unset percentage compares against 0
    pub fn ratio_threshold(&self) -> f64 {
        self.limit_pct.unwrap_or(0.0)
    }

    /// Replace `limit_pct` only when the rule already defines one
    ///
    /// Returns whether the rule changed.
    pub fn override_limit_pct(&mut self, limit_pct: f64) -> bool {
        match self.limit_pct {
            Some(_) => {
                self.limit_pct = Some(limit_pct);
                true
            }
            None => false,
        }
    }
}

impl TryFrom<RuleSpec> for RuleDefinition {
    type Error = AnalysisError;

    fn try_from(spec: RuleSpec) -> Result<Self> {
        let column = spec.resource_limit_column.filter(|c| !c.trim().is_empty());
        let limit = match (spec.resource_limit_value, column) {
            (Some(value), None) => LimitSource::Fixed(value),
            (None, Some(column)) => LimitSource::Column(column.trim().to_string()),
            _ => {
                return Err(AnalysisError::LimitSource {
                    resource: spec.resource,
                })
            }
        };
        let compare: Compare = spec.compare.parse()?;
        let rule = Self {
            resource: spec.resource.trim().to_string(),
            limit,
            limit_pct: spec.limit_pct,
            compare,
            group_by: spec.group_by.map(normalize_group_keys),
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl From<RuleDefinition> for RuleSpec {
    fn from(rule: RuleDefinition) -> Self {
        let (resource_limit_value, resource_limit_column) = match rule.limit {
            LimitSource::Fixed(value) => (Some(value), None),
            LimitSource::Column(column) => (None, Some(column)),
        };
        Self {
            resource: rule.resource,
            resource_limit_column,
            resource_limit_value,
            limit_pct: rule.limit_pct,
            compare: rule.compare.symbol().to_string(),
            group_by: rule.group_by,
        }
    }
}

impl fmt::Display for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.limit {
            LimitSource::Fixed(value) => write!(f, "{} {} {}", self.resource, self.compare, value),
            LimitSource::Column(column) => match self.limit_pct {
                Some(pct) => write!(
                    f,
                    "{}/{} {} {:.1}%",
                    self.resource,
                    column,
                    self.compare,
                    pct * 100.0
                ),
                None => write!(f, "{}/{} {} 0", self.resource, column, self.compare),
            },
        }
    }
}

/// Apply a global `limit_pct` override to a rule list
///
/// Rules left without a percentage on purpose stay untouched. Returns the
/// number of rules changed.
pub fn apply_limit_pct_override(rules: &mut [RuleDefinition], limit_pct: f64) -> usize {
    rules
        .iter_mut()
        .map(|rule| rule.override_limit_pct(limit_pct))
        .filter(|changed| *changed)
        .count()
}

/// Trim, de-duplicate and sort group keys
///
/// Prometheus returns labels in alphabetical order, so key order carries no
/// meaning.
pub fn normalize_group_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut keys: Vec<String> = keys
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Rule document: one table of series plus the rules checked against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    pub name: String,
    #[serde(rename = "tableName", default)]
    pub table_name: String,
    #[serde(rename = "groupBy", default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl RuleDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AnalysisError::InvalidConfig(format!("rule document: {e}")))
    }

    /// Normalized group keys of the table
    pub fn group_keys(&self) -> Vec<String> {
        normalize_group_keys(self.group_by.iter().cloned())
    }

    /// Validate every rule independently
    pub fn validated_rules(&self) -> Vec<Result<RuleDefinition>> {
        self.rules
            .iter()
            .cloned()
            .map(RuleDefinition::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_rule(pct: Option<f64>) -> RuleDefinition {
        RuleDefinition::new(
            "MEMORY_BYTE",
            LimitSource::Column("MEMORY_LIMIT_BYTE".to_string()),
            pct,
            Compare::Greater,
        )
        .unwrap()
    }

    #[test]
    fn test_compare_boundaries() {
        assert!(Compare::Greater.holds(5.1, 5.0));
        assert!(!Compare::Greater.holds(5.0, 5.0));
        assert!(Compare::Less.holds(4.9, 5.0));
        assert!(!Compare::Less.holds(5.0, 5.0));
        assert!(Compare::Equal.holds(5.0, 5.0));
        assert!(!Compare::Equal.holds(5.1, 5.0));
    }

    #[test]
    fn test_compare_parsing() {
        assert_eq!(">".parse::<Compare>().unwrap(), Compare::Greater);
        assert_eq!("LESS".parse::<Compare>().unwrap(), Compare::Less);
        assert_eq!("=".parse::<Compare>().unwrap(), Compare::Equal);
        assert_eq!("Delta".parse::<Compare>().unwrap(), Compare::Delta);
        assert!(matches!(
            ">=".parse::<Compare>(),
            Err(AnalysisError::UnknownCompare(_))
        ));
    }

    #[test]
    fn test_spec_requires_exactly_one_limit_source() {
        let both = RuleSpec {
            resource: "cpu".to_string(),
            resource_limit_column: Some("CPU_LIMIT_CORE".to_string()),
            resource_limit_value: Some(1.0),
            compare: ">".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RuleDefinition::try_from(both),
            Err(AnalysisError::LimitSource { .. })
        ));

        let neither = RuleSpec {
            resource: "cpu".to_string(),
            resource_limit_column: Some("  ".to_string()),
            compare: ">".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RuleDefinition::try_from(neither),
            Err(AnalysisError::LimitSource { .. })
        ));
    }

    #[test]
    fn test_delta_needs_fixed_limit() {
        let err = RuleDefinition::new(
            "MEMORY_BYTE",
            LimitSource::Column("MEMORY_LIMIT_BYTE".to_string()),
            None,
            Compare::Delta,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_selective_override() {
        let mut rules = vec![column_rule(Some(0.8)), column_rule(None)];
        let changed = apply_limit_pct_override(&mut rules, 0.9);
        assert_eq!(changed, 1);
        assert_eq!(rules[0].limit_pct, Some(0.9));
        assert_eq!(rules[1].limit_pct, None);
    }

    #[test]
    fn test_document_parsing() {
        let json = r#"{
            "name": "pod basic resources",
            "tableName": "POD_BASIC_RESOURCES",
            "groupBy": ["pod ", "container", "pod"],
            "rules": [
                {"resource": "MEMORY_BYTE", "resource_limit_column": "MEMORY_LIMIT_BYTE", "limit_pct": 0.8},
                {"resource": "RESTARTS", "resource_limit_value": 0, "compare": "delta"},
                {"resource": "CPU_CORE", "resource_limit_value": 1, "compare": ">="}
            ]
        }"#;
        let doc = RuleDocument::from_json(json).unwrap();
        assert_eq!(doc.group_keys(), vec!["container", "pod"]);

        let rules = doc.validated_rules();
        assert_eq!(rules.len(), 3);
        let memory = rules[0].as_ref().unwrap();
        assert_eq!(memory.compare, Compare::Greater);
        assert_eq!(memory.limit, LimitSource::Column("MEMORY_LIMIT_BYTE".to_string()));
        assert_eq!(rules[1].as_ref().unwrap().limit, LimitSource::Fixed(0.0));
        assert!(matches!(rules[2], Err(AnalysisError::UnknownCompare(_))));
    }

    #[test]
    fn test_rule_serde_round_trip_keeps_document_shape() {
        let rule = column_rule(Some(0.8));
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["resource_limit_column"], "MEMORY_LIMIT_BYTE");
        assert_eq!(json["compare"], ">");
        let back: RuleDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            column_rule(Some(0.8)).to_string(),
            "MEMORY_BYTE/MEMORY_LIMIT_BYTE > 80.0%"
        );
    }
}
