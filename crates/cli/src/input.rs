//! Loading input files
//!
//! Data files hold either a list of samples
//! (`[{"timestamp", "labels", "values"}]`) or a range query matrix keyed by
//! column and label text:
//!
//! ```json
//! {"group_by": ["container", "pod"],
//!  "matrix": {"CPU_CORE": {"{container=\"app\",pod=\"app-1\"}": [["2024-01-01T00:00:00Z", 0.5]]}}}
//! ```

use analysis_lib::rules::RuleDocument;
use analysis_lib::series::{matrix_to_samples, LabelledColumn};
use analysis_lib::source::{prepare_samples, SampleSource};
use analysis_lib::{AnalysisError, MetricSample, TimeRange};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataFile {
    Records(Vec<MetricSample>),
    Matrix {
        group_by: Vec<String>,
        matrix: BTreeMap<String, LabelledColumn>,
    },
}

/// Samples stored in a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self { path, name }
    }

    fn source_error(&self, reason: impl ToString) -> AnalysisError {
        AnalysisError::Source {
            source_name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SampleSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, range: Option<&TimeRange>) -> analysis_lib::Result<Vec<MetricSample>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.source_error(e))?;
        let samples = match serde_json::from_str(&text).map_err(|e| self.source_error(e))? {
            DataFile::Records(samples) => samples,
            DataFile::Matrix { group_by, matrix } => matrix_to_samples(&matrix, &group_by)?,
        };
        Ok(prepare_samples(&self.name, samples, range))
    }
}

/// Read and parse a rule document
pub fn read_rule_document(path: &Path) -> Result<RuleDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule document {}", path.display()))?;
    RuleDocument::from_json(&text)
        .with_context(|| format!("Failed to parse rule document {}", path.display()))
}

/// Sorted union of the label names of all samples
pub fn label_dimensions(samples: &[MetricSample]) -> Vec<String> {
    samples
        .iter()
        .flat_map(|s| s.labels.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
