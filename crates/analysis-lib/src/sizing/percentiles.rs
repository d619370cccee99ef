//! Descriptive statistics of a usage sample

use serde::{Deserialize, Serialize};

/// One requested percentile and its value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    /// Fraction in `[0, 1]`
    pub p: f64,
    pub value: f64,
}

/// Count, moments, extremes and percentiles of a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation, absent below two values
    pub std: Option<f64>,
    pub min: f64,
    pub percentiles: Vec<Quantile>,
    pub max: f64,
}

impl Distribution {
    /// Describe `values`, `None` when there are none
    ///
    /// Percentiles interpolate linearly between the closest ranks.
    pub fn describe(values: &[f64], percentiles: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let std = (count > 1).then(|| {
            let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        });

        Some(Self {
            count,
            mean,
            std,
            min: sorted[0],
            percentiles: percentiles
                .iter()
                .map(|p| Quantile {
                    p: *p,
                    value: quantile(&sorted, *p),
                })
                .collect(),
            max: sorted[count - 1],
        })
    }

    /// Value of a percentile requested at construction
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|q| (q.p - p).abs() < 1e-9)
            .map(|q| q.value)
    }

    /// Apply a unit conversion to every value statistic
    pub fn scaled(&self, convert: impl Fn(f64) -> f64) -> Self {
        Self {
            count: self.count,
            mean: convert(self.mean),
            std: self.std.map(&convert),
            min: convert(self.min),
            percentiles: self
                .percentiles
                .iter()
                .map(|q| Quantile {
                    p: q.p,
                    value: convert(q.value),
                })
                .collect(),
            max: convert(self.max),
        }
    }
}

/// Column label of a percentile, e.g. `95%`
pub fn percentile_label(p: f64) -> String {
    format!("{}%", (p * 100.0).round() as i64)
}

/// Linear interpolation quantile of an ascending, non-empty slice
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
}
