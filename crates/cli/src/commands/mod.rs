//! CLI commands

pub mod evaluate;
pub mod labels;
pub mod size;

use analysis_lib::models::NAMESPACE_DIMENSION;
use analysis_lib::{AnalyzerMetrics, EntityKeyedSeries, StructuredLogger, TimeRange};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::output::OutputFormat;

/// Shared state of one CLI invocation
pub struct RunContext {
    pub settings: Settings,
    pub format: OutputFormat,
    pub metrics: AnalyzerMetrics,
    pub logger: StructuredLogger,
}

/// Label shown for data without a namespace dimension
const NO_NAMESPACE: &str = "-";

/// Time range from the command line, `None` when no bound was given
///
/// Input files are snapshots, so they are only bounded on request.
pub fn time_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    delta_hours: Option<f64>,
    settings: &Settings,
) -> Result<Option<TimeRange>> {
    if start.is_none() && end.is_none() && delta_hours.is_none() {
        return Ok(None);
    }
    let delta = delta_hours.unwrap_or(settings.delta_hours);
    Ok(Some(TimeRange::new(start, end, delta)?))
}

/// Split `series` per namespace and keep the requested one
///
/// Series without a namespace dimension form a single group. Asking for a
/// namespace the data does not contain is an error.
pub fn select_namespaces(
    series: &EntityKeyedSeries,
    namespace: Option<&str>,
) -> Result<Vec<(String, EntityKeyedSeries)>> {
    if !series.dimensions().iter().any(|d| d == NAMESPACE_DIMENSION) {
        if let Some(namespace) = namespace {
            bail!("namespace {namespace} requested but the data has no namespace label");
        }
        return Ok(vec![(NO_NAMESPACE.to_string(), series.clone())]);
    }

    let mut split = series.split_by(NAMESPACE_DIMENSION)?;
    match namespace {
        Some(namespace) => match split.remove(namespace) {
            Some(selected) => Ok(vec![(namespace.to_string(), selected)]),
            None => bail!(
                "namespace {namespace} not found, available: {:?}",
                split.keys().collect::<Vec<_>>()
            ),
        },
        None => Ok(split.into_iter().collect()),
    }
}
