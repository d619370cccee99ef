//! Configuration management for the CLI
//!
//! Settings are layered: built-in defaults, then an optional config file,
//! then `RIGHTSIZE_*` environment variables (`__` separates nested keys,
//! e.g. `RIGHTSIZE_SIZING__LIMIT_PERCENTILE=0.99`).

use analysis_lib::{EvaluationConfig, SizingConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "RIGHTSIZE";

/// CLI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Window length used when no start time is given
    pub delta_hours: f64,
    /// Namespace used when none is given on the command line
    pub default_namespace: Option<String>,
    pub evaluation: EvaluationConfig,
    pub sizing: SizingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delta_hours: 1.0,
            default_namespace: None,
            evaluation: EvaluationConfig::default(),
            sizing: SizingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_file(),
        };
        Self::load_from(file.as_deref())
    }

    fn load_from(file: Option<&Path>) -> Result<Self> {
        // unset keys fall back to `Settings::default()` through serde
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.delta_hours.is_finite() && self.delta_hours > 0.0,
            "delta_hours must be positive, got {}",
            self.delta_hours
        );
        self.evaluation.validate()?;
        self.sizing.validate()?;
        Ok(())
    }
}

/// First existing `config.{toml,json,yaml}` under `~/.config/rightsize`
fn default_config_file() -> Option<PathBuf> {
    let dir = dirs_next::home_dir()?.join(".config").join("rightsize");
    ["config.toml", "config.json", "config.yaml"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load_from(None).unwrap();
        assert_eq!(settings.delta_hours, 1.0);
        assert_eq!(settings.sizing.request_percentile, 0.5);
        assert_eq!(settings.evaluation.min_run_length, 1);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"delta_hours": 6, "sizing": {{"limit_percentile": 0.99}}, "evaluation": {{"min_run_length": 3}}}}"#
        )
        .unwrap();

        let settings = Settings::load_from(Some(file.path())).unwrap();
        assert_eq!(settings.delta_hours, 6.0);
        assert_eq!(settings.sizing.limit_percentile, 0.99);
        assert_eq!(settings.sizing.request_percentile, 0.5);
        assert_eq!(settings.evaluation.min_run_length, 3);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"sizing": {{"request_percentile": 0.99, "limit_percentile": 0.5}}}}"#)
            .unwrap();
        assert!(Settings::load_from(Some(file.path())).is_err());
    }
}
