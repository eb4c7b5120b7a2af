//! Configuration types for uff-runner.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{Result, RunnerError};
use crate::inference::BackendKind;
use crate::shape::ScalarType;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Model configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Inference configuration.
    #[serde(default)]
    pub inference: InferenceConfig,
}

/// Model configuration.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Path to the model description.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Backend to compile the model for.
    #[serde(default)]
    pub backend: BackendKind,

    /// Image input height.
    #[serde(default = "default_input_height")]
    pub input_height: usize,

    /// Image input width.
    #[serde(default = "default_input_width")]
    pub input_width: usize,

    /// Plan precision (fp32, fp16, int8).
    #[serde(default = "default_precision")]
    pub precision: String,
}

impl ModelConfig {
    /// Parsed plan precision.
    pub fn precision(&self) -> Result<ScalarType> {
        self.precision.parse()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            backend: BackendKind::default(),
            input_height: default_input_height(),
            input_width: default_input_width(),
            precision: default_precision(),
        }
    }
}

/// Inference configuration.
#[derive(Debug, Deserialize)]
pub struct InferenceConfig {
    /// Largest batch the compiled plan accepts.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_input_height() -> usize {
    368
}

fn default_input_width() -> usize {
    432
}

fn default_precision() -> String {
    "fp32".to_string()
}

fn default_max_batch_size() -> usize {
    1
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RunnerError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.inference.max_batch_size == 0 {
            return Err(RunnerError::config("inference.max_batch_size must be positive"));
        }
        if self.model.input_height == 0 || self.model.input_width == 0 {
            return Err(RunnerError::config("model input size must be positive"));
        }
        self.model.precision()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_sections() {
        let config = Config::from_yaml_str("model: {}\n").unwrap();
        assert_eq!(config.model.backend, BackendKind::Host);
        assert_eq!(config.model.input_height, 368);
        assert_eq!(config.model.input_width, 432);
        assert_eq!(config.model.precision().unwrap(), ScalarType::Float32);
        assert_eq!(config.inference.max_batch_size, 1);
        assert!(config.model.path.is_none());
    }

    #[test]
    fn full_config() {
        let yaml = r#"
model:
  path: models/pose.uff
  backend: tensorrt
  input_height: 256
  input_width: 384
  precision: fp16
inference:
  max_batch_size: 8
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.model.path, Some(PathBuf::from("models/pose.uff")));
        assert_eq!(config.model.backend, BackendKind::TensorRt);
        assert_eq!(config.model.precision().unwrap(), ScalarType::Float16);
        assert_eq!(config.inference.max_batch_size, 8);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_yaml_str("inference:\n  max_batch_size: 0\n"),
            Err(RunnerError::Config(_))
        ));
        assert!(Config::from_yaml_str("model:\n  precision: bf16\n").is_err());
        assert!(matches!(
            Config::from_yaml_str("model: [1, 2"),
            Err(RunnerError::Yaml(_))
        ));
    }
}
