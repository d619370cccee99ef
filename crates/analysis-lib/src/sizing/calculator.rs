//! Percentile-based request/limit sizing
//!
//! Usage of every entity is described by percentiles, the configured
//! request/limit of the entity is resolved alongside, and both are
//! collapsed to the container by taking the maximum across pods.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::percentiles::Distribution;
use crate::error::{AnalysisError, Result};
use crate::models::{
    ConfiguredResources, EntityKey, RequestLimit, SizingResult, CONTAINER_DIMENSION,
    CPU_CORE_COLUMN, CPU_LIMIT_CORE_COLUMN, CPU_REQUEST_CORE_COLUMN, MEMORY_BYTE_COLUMN,
    MEMORY_LIMIT_BYTE_COLUMN, MEMORY_REQUEST_BYTE_COLUMN, MIB,
};
use crate::series::EntityKeyedSeries;

/// Normalized unit of a sized resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Cores in, millicores out
    MilliCores,
    /// Bytes in, MiB out
    Mebibytes,
}

impl Unit {
    /// Convert a usage statistic: millicores keep one decimal, MiB are whole
    pub fn scale(&self, raw: f64) -> f64 {
        match self {
            Self::MilliCores => (raw * 10_000.0).round() / 10.0,
            Self::Mebibytes => (raw / MIB).trunc(),
        }
    }

    /// Convert a configured request or limit, always truncated
    pub fn whole(&self, raw: f64) -> u64 {
        let converted = match self {
            Self::MilliCores => raw * 1000.0,
            Self::Mebibytes => raw / MIB,
        };
        converted.max(0.0).trunc() as u64
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::MilliCores => "m",
            Self::Mebibytes => "Mi",
        }
    }
}

/// Column names of one sized resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub name: &'static str,
    pub unit: Unit,
    pub measured: &'static str,
    pub limit: &'static str,
    pub request: &'static str,
}

pub const CPU_RESOURCE: Resource = Resource {
    name: "cpu",
    unit: Unit::MilliCores,
    measured: CPU_CORE_COLUMN,
    limit: CPU_LIMIT_CORE_COLUMN,
    request: CPU_REQUEST_CORE_COLUMN,
};

pub const MEMORY_RESOURCE: Resource = Resource {
    name: "memory",
    unit: Unit::Mebibytes,
    measured: MEMORY_BYTE_COLUMN,
    limit: MEMORY_LIMIT_BYTE_COLUMN,
    request: MEMORY_REQUEST_BYTE_COLUMN,
};

/// Sizing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Percentiles reported in the percentile tables
    pub percentiles: Vec<f64>,
    /// Percentile recommended as request
    pub request_percentile: f64,
    /// Percentile recommended as limit
    pub limit_percentile: f64,
    /// Containers at or below this CPU recommendation are noise
    pub cpu_floor_millis: f64,
    /// Containers at or below this memory recommendation are noise
    pub memory_floor_mib: f64,
    /// Minimum CPU request for a container to be exported to INI
    pub ini_min_cpu_request_millis: u64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            percentiles: vec![0.5, 0.75, 0.9, 0.95, 0.99],
            request_percentile: 0.5,
            limit_percentile: 0.95,
            cpu_floor_millis: 1.0,
            memory_floor_mib: 1.0,
            ini_min_cpu_request_millis: 10,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Result<()> {
        let in_range = |p: f64| (0.0..=1.0).contains(&p);
        if let Some(p) = self.percentiles.iter().find(|p| !in_range(**p)) {
            return Err(AnalysisError::InvalidConfig(format!(
                "percentile {p} outside [0, 1]"
            )));
        }
        if !in_range(self.request_percentile) || !in_range(self.limit_percentile) {
            return Err(AnalysisError::InvalidConfig(format!(
                "request/limit percentiles {}/{} outside [0, 1]",
                self.request_percentile, self.limit_percentile
            )));
        }
        if self.request_percentile > self.limit_percentile {
            return Err(AnalysisError::InvalidConfig(format!(
                "request percentile {} above limit percentile {}",
                self.request_percentile, self.limit_percentile
            )));
        }
        if !(self.cpu_floor_millis >= 0.0 && self.memory_floor_mib >= 0.0) {
            return Err(AnalysisError::InvalidConfig(
                "sizing floors must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Report percentiles plus the request/limit ones, ascending
    fn described_percentiles(&self) -> Vec<f64> {
        let mut all = self.percentiles.clone();
        all.push(self.request_percentile);
        all.push(self.limit_percentile);
        all.sort_by(f64::total_cmp);
        all.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        all
    }
}

/// Usage and configuration of one entity for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUsage {
    /// Raw (unscaled) usage distribution
    pub distribution: Distribution,
    /// Configured request/limit in normalized units
    pub configured: ConfiguredResources,
}

/// Usage of every entity for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsRequests {
    pub resource: Resource,
    pub dimensions: Vec<String>,
    pub entities: BTreeMap<EntityKey, EntityUsage>,
}

impl LimitsRequests {
    /// Describe `resource` for every entity of `series`
    ///
    /// Entities without any measured value are absent, and a series
    /// without the measured column yields no entities at all. The limit
    /// and request columns are optional, but where present every
    /// non-missing value of an entity must agree.
    pub fn from_series(
        series: &EntityKeyedSeries,
        resource: Resource,
        percentiles: &[f64],
    ) -> Result<Self> {
        let mut entities = BTreeMap::new();
        let Ok(measured_idx) = series.column_index(resource.measured) else {
            debug!(
                resource = resource.name,
                column = resource.measured,
                "Measured column absent"
            );
            return Ok(Self {
                resource,
                dimensions: series.dimensions().to_vec(),
                entities,
            });
        };
        let limit_idx = series.column_index(resource.limit).ok();
        let request_idx = series.column_index(resource.request).ok();

        for entity in series.entities() {
            let values: Vec<f64> = series
                .column_values(entity, measured_idx)
                .filter_map(|(_, v)| v)
                .collect();
            let Some(distribution) = Distribution::describe(&values, percentiles) else {
                debug!(entity = %entity, resource = resource.name, "No measured values");
                continue;
            };
            let limit = single_value(series, entity, resource.limit, limit_idx)?;
            let request = single_value(series, entity, resource.request, request_idx)?;
            entities.insert(
                entity.clone(),
                EntityUsage {
                    distribution,
                    configured: ConfiguredResources {
                        request: request.map(|v| resource.unit.whole(v)),
                        limit: limit.map(|v| resource.unit.whole(v)),
                    },
                },
            );
        }

        Ok(Self {
            resource,
            dimensions: series.dimensions().to_vec(),
            entities,
        })
    }
}

/// Percentile report row of one entity in normalized units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileRow {
    pub entity: EntityKey,
    pub distribution: Distribution,
    pub configured: ConfiguredResources,
}

/// Per-container recommendation of one resource, before the join
#[derive(Debug, Clone, Copy, PartialEq)]
struct ContainerSizing {
    request: f64,
    limit: f64,
    configured: ConfiguredResources,
}

/// Derives per-container request/limit recommendations
#[derive(Debug, Clone)]
pub struct PercentileSizingCalculator {
    config: SizingConfig,
}

impl PercentileSizingCalculator {
    pub fn new(config: SizingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Recommend requests and limits per container
    ///
    /// Containers below the floor of either resource, or missing from one
    /// of the two series, are not sized.
    pub fn size(
        &self,
        cpu_series: &EntityKeyedSeries,
        memory_series: &EntityKeyedSeries,
    ) -> Result<Vec<SizingResult>> {
        let cpu = self.per_container(cpu_series, CPU_RESOURCE, self.config.cpu_floor_millis)?;
        let memory =
            self.per_container(memory_series, MEMORY_RESOURCE, self.config.memory_floor_mib)?;

        let results: Vec<SizingResult> = cpu
            .into_iter()
            .filter_map(|(container, cpu)| {
                let Some(memory) = memory.get(&container) else {
                    debug!(container = %container, "No memory sizing, container dropped");
                    return None;
                };
                Some(SizingResult {
                    cpu_millis: RequestLimit {
                        request: cpu.request as u64,
                        limit: cpu.limit as u64,
                    },
                    memory_mib: RequestLimit {
                        request: memory.request as u64,
                        limit: memory.limit as u64,
                    },
                    current_cpu_millis: cpu.configured,
                    current_memory_mib: memory.configured,
                    container,
                })
            })
            .collect();

        info!(containers = results.len(), "Sizing computed");
        Ok(results)
    }

    /// Per-entity percentile table of one resource in normalized units
    pub fn percentile_table(
        &self,
        series: &EntityKeyedSeries,
        resource: Resource,
    ) -> Result<Vec<PercentileRow>> {
        let usage = LimitsRequests::from_series(series, resource, &self.config.percentiles)?;
        Ok(usage
            .entities
            .into_iter()
            .map(|(entity, usage)| PercentileRow {
                entity,
                distribution: usage.distribution.scaled(|v| resource.unit.scale(v)),
                configured: usage.configured,
            })
            .collect())
    }

    fn per_container(
        &self,
        series: &EntityKeyedSeries,
        resource: Resource,
        floor: f64,
    ) -> Result<BTreeMap<String, ContainerSizing>> {
        let usage =
            LimitsRequests::from_series(series, resource, &self.config.described_percentiles())?;
        if !usage.dimensions.iter().any(|d| d == CONTAINER_DIMENSION) {
            return Err(AnalysisError::MissingColumn {
                column: CONTAINER_DIMENSION.to_string(),
                available: usage.dimensions.clone(),
            });
        }

        let mut containers: BTreeMap<String, ContainerSizing> = BTreeMap::new();
        for (entity, usage_row) in &usage.entities {
            let container = entity
                .get(&usage.dimensions, CONTAINER_DIMENSION)
                .unwrap_or_default()
                .to_string();
            let scaled = |p: f64| {
                usage_row
                    .distribution
                    .percentile(p)
                    .map(|v| resource.unit.scale(v))
                    .unwrap_or(0.0)
            };
            let sizing = ContainerSizing {
                request: scaled(self.config.request_percentile),
                limit: scaled(self.config.limit_percentile),
                configured: usage_row.configured,
            };
            containers
                .entry(container)
                .and_modify(|current| {
                    current.request = current.request.max(sizing.request);
                    current.limit = current.limit.max(sizing.limit);
                    current.configured = max_configured(current.configured, sizing.configured);
                })
                .or_insert(sizing);
        }

        containers.retain(|container, sizing| {
            let keep = sizing.request > floor && sizing.limit > floor;
            if !keep {
                debug!(
                    container = %container,
                    resource = resource.name,
                    request = sizing.request,
                    limit = sizing.limit,
                    "Below sizing floor, container dropped"
                );
            }
            keep
        });
        Ok(containers)
    }
}

/// Field-wise maximum, a configured value wins over an absent one
pub(crate) fn max_configured(a: ConfiguredResources, b: ConfiguredResources) -> ConfiguredResources {
    ConfiguredResources {
        request: a.request.max(b.request),
        limit: a.limit.max(b.limit),
    }
}

/// The single non-missing value of a column for an entity
fn single_value(
    series: &EntityKeyedSeries,
    entity: &EntityKey,
    column: &str,
    column_idx: Option<usize>,
) -> Result<Option<f64>> {
    let Some(idx) = column_idx else {
        return Ok(None);
    };
    let mut found: Option<f64> = None;
    for (_, value) in series.column_values(entity, idx) {
        let Some(value) = value else { continue };
        match found {
            Some(first) if first != value => {
                return Err(AnalysisError::InconsistentLimit {
                    column: column.to_string(),
                    entity: entity.to_string(),
                    first,
                    second: value,
                })
            }
            _ => found = Some(value),
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(Unit::MilliCores.scale(0.123_456), 123.5);
        assert_eq!(Unit::MilliCores.whole(0.5), 500);
        assert_eq!(Unit::Mebibytes.scale(1.9 * MIB), 1.0);
        assert_eq!(Unit::Mebibytes.whole(256.0 * MIB), 256);
        assert_eq!(Unit::Mebibytes.suffix(), "Mi");
    }

    #[test]
    fn test_config_validation() {
        assert!(SizingConfig::default().validate().is_ok());

        let inverted = SizingConfig {
            request_percentile: 0.99,
            limit_percentile: 0.5,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let out_of_range = SizingConfig {
            percentiles: vec![0.5, 95.0],
            ..Default::default()
        };
        assert!(PercentileSizingCalculator::new(out_of_range).is_err());
    }

    #[test]
    fn test_described_percentiles_include_request_and_limit() {
        let config = SizingConfig {
            percentiles: vec![0.9, 0.5],
            request_percentile: 0.6,
            limit_percentile: 0.9,
            ..Default::default()
        };
        assert_eq!(config.described_percentiles(), vec![0.5, 0.6, 0.9]);
    }

    #[test]
    fn test_max_configured_prefers_present_values() {
        let a = ConfiguredResources {
            request: Some(400),
            limit: None,
        };
        let b = ConfiguredResources {
            request: Some(500),
            limit: Some(900),
        };
        let merged = max_configured(a, b);
        assert_eq!(merged.request, Some(500));
        assert_eq!(merged.limit, Some(900));
    }
}
