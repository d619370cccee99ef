//! Core data models shared by rule evaluation and sizing

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AnalysisError, Result};

pub const NAMESPACE_DIMENSION: &str = "namespace";
pub const POD_DIMENSION: &str = "pod";
pub const CONTAINER_DIMENSION: &str = "container";

pub const CPU_CORE_COLUMN: &str = "CPU_CORE";
pub const CPU_LIMIT_CORE_COLUMN: &str = "CPU_LIMIT_CORE";
pub const CPU_REQUEST_CORE_COLUMN: &str = "CPU_REQUEST_CORE";
pub const MEMORY_BYTE_COLUMN: &str = "MEMORY_BYTE";
pub const MEMORY_LIMIT_BYTE_COLUMN: &str = "MEMORY_LIMIT_BYTE";
pub const MEMORY_REQUEST_BYTE_COLUMN: &str = "MEMORY_REQUEST_BYTE";

/// Bytes per MiB
pub const MIB: f64 = 1024.0 * 1024.0;

/// One row of the input feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    /// Entity dimensions, e.g. namespace/pod/container
    pub labels: BTreeMap<String, String>,
    /// Named numeric columns, `None` when the observation is missing
    pub values: BTreeMap<String, Option<f64>>,
}

impl MetricSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            labels: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_value(mut self, column: impl Into<String>, value: Option<f64>) -> Self {
        self.values.insert(column.into(), value);
        self
    }
}

/// Ordered tuple of dimension values identifying one time series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub Vec<String>);

impl EntityKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Value of a dimension given the ordered dimension names of the key
    pub fn get<'a>(&'a self, dimensions: &[String], dimension: &str) -> Option<&'a str> {
        dimensions
            .iter()
            .position(|d| d == dimension)
            .and_then(|idx| self.0.get(idx))
            .map(String::as_str)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Closed time range an evaluation run is bounded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range from optional bounds
    ///
    /// A missing end defaults to now, floored to the minute, and a missing
    /// start to `end - delta_hours`.
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        delta_hours: f64,
    ) -> Result<Self> {
        let to = end.unwrap_or_else(|| {
            let now = Utc::now();
            now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
        });
        let from = match start {
            Some(start) => start,
            None => {
                if !delta_hours.is_finite() || delta_hours <= 0.0 {
                    return Err(AnalysisError::InvalidConfig(format!(
                        "delta hours must be positive, got {delta_hours}"
                    )));
                }
                to - Duration::milliseconds((delta_hours * 3_600_000.0) as i64)
            }
        };
        if from > to {
            return Err(AnalysisError::InvalidConfig(format!(
                "time range start {from} is after end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.from && *timestamp <= self.to
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const FORMAT: &str = "%Y-%m-%dT%H-%M-%S";
        write!(f, "{}_{}", self.from.format(FORMAT), self.to.format(FORMAT))
    }
}

/// Entity-level outcome of one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub entity: EntityKey,
    pub violation_count: usize,
    /// Non-missing samples of the entity in the window
    pub valid_samples: usize,
    /// `100 * violation_count / valid_samples`
    pub violation_pct: f64,
    /// Longest continuous violation, absent when no run qualified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_secs: Option<f64>,
    /// `max - min` over the window, only for delta rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Request and limit pair in normalized units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimit {
    pub request: u64,
    pub limit: u64,
}

/// Request and limit currently configured on a workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredResources {
    pub request: Option<u64>,
    pub limit: Option<u64>,
}

/// Final right-sizing recommendation for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingResult {
    pub container: String,
    /// Recommended CPU in millicores
    pub cpu_millis: RequestLimit,
    /// Recommended memory in MiB
    pub memory_mib: RequestLimit,
    /// Configured CPU in millicores (max across pods)
    pub current_cpu_millis: ConfiguredResources,
    /// Configured memory in MiB (max across pods)
    pub current_memory_mib: ConfiguredResources,
}
