//! Error types for uff-runner.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::shape::ScalarType;

/// Result type alias for uff-runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Stage of plan compilation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStage {
    /// The model parser rejected the model description.
    Parse,
    /// The builder produced no plan from a parsed network.
    Build,
}

impl fmt::Display for CompileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::Build => write!(f, "build"),
        }
    }
}

/// Errors that can occur while compiling a plan or running inference.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Plan compilation failed.
    #[error("Plan compilation failed at {stage} stage (precision {precision}): {reason}")]
    Compilation {
        stage: CompileStage,
        precision: ScalarType,
        reason: String,
    },

    /// Device allocation, copy or execution failed.
    #[error("Device error: {0}")]
    Device(String),

    /// Host buffers do not line up with the plan's bindings.
    #[error("Binding mismatch: {0}")]
    BindingMismatch(String),

    /// Invalid tensor shape.
    #[error("Invalid shape: {0}")]
    Shape(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl RunnerError {
    /// Create a compilation error.
    pub fn compilation(stage: CompileStage, precision: ScalarType, reason: impl Into<String>) -> Self {
        Self::Compilation {
            stage,
            precision,
            reason: reason.into(),
        }
    }

    /// Create a device error.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a binding mismatch error.
    pub fn binding_mismatch(msg: impl Into<String>) -> Self {
        Self::BindingMismatch(msg.into())
    }

    /// Create a shape error.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error came out of plan compilation.
    pub fn is_compilation(&self) -> bool {
        matches!(self, Self::Compilation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RunnerError::compilation(CompileStage::Parse, ScalarType::Float16, "bad magic");
        assert_eq!(
            format!("{}", err),
            "Plan compilation failed at parse stage (precision fp16): bad magic"
        );
        assert!(err.is_compilation());

        let err = RunnerError::config("max batch size must be positive");
        assert_eq!(
            format!("{}", err),
            "Configuration error: max batch size must be positive"
        );
        assert!(!err.is_compilation());

        let err = RunnerError::FileNotFound(PathBuf::from("/models/pose.uff"));
        assert_eq!(format!("{}", err), "File not found: /models/pose.uff");
    }
}
