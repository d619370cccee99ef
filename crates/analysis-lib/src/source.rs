//! Input feed of metric samples
//!
//! A [`SampleSource`] yields rows for one time range. Sources are expected
//! to bound rows to the range and drop exact duplicates before the rows
//! reach an [`EntityKeyedSeries`](crate::series::EntityKeyedSeries);
//! [`prepare_samples`] does both.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{MetricSample, TimeRange};

/// Provider of time-range bounded samples
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Load all samples, bounded to `range` when given
    async fn load(&self, range: Option<&TimeRange>) -> Result<Vec<MetricSample>>;
}

/// Samples already held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    name: String,
    samples: Vec<MetricSample>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, samples: Vec<MetricSample>) -> Self {
        Self {
            name: name.into(),
            samples,
        }
    }
}

#[async_trait]
impl SampleSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, range: Option<&TimeRange>) -> Result<Vec<MetricSample>> {
        Ok(prepare_samples(&self.name, self.samples.clone(), range))
    }
}

/// Bound samples to `range` and drop exact duplicate rows
///
/// Rows sharing timestamp and labels but carrying different values are
/// kept, the series builder rejects them.
pub fn prepare_samples(
    source: &str,
    mut samples: Vec<MetricSample>,
    range: Option<&TimeRange>,
) -> Vec<MetricSample> {
    let loaded = samples.len();
    if let Some(range) = range {
        samples.retain(|s| range.contains(&s.timestamp));
    }
    let in_range = samples.len();

    samples.sort_by(|a, b| (a.timestamp, &a.labels).cmp(&(b.timestamp, &b.labels)));
    samples.dedup();
    let removed = in_range - samples.len();

    debug!(source, loaded, in_range, "Samples bounded to time range");
    if removed > 0 {
        info!(source, removed, "Dropped duplicate samples");
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(minute: i64, pod: &str, value: f64) -> MetricSample {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        MetricSample::new(t0 + Duration::minutes(minute))
            .with_label("pod", pod)
            .with_value("CPU_CORE", Some(value))
    }

    #[test]
    fn test_prepare_bounds_and_dedups() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(Some(t0), Some(t0 + Duration::minutes(2)), 1.0).unwrap();
        let samples = vec![
            sample(3, "a", 0.1),
            sample(1, "a", 0.2),
            sample(1, "a", 0.2),
            sample(0, "a", 0.1),
            sample(0, "a", 0.9),
        ];

        let prepared = prepare_samples("test", samples, Some(&range));
        // the exact copy goes, the conflicting row stays
        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[0].timestamp, t0);
        assert!(prepared.iter().all(|s| range.contains(&s.timestamp)));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSource::new("memory", vec![sample(0, "a", 0.1), sample(0, "a", 0.1)]);
        assert_eq!(source.name(), "memory");
        let samples = source.load(None).await.unwrap();
        assert_eq!(samples.len(), 1);
    }
}
