//! Command-line interface for uff-runner.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{Result, RunnerError};
use crate::inference::BackendKind;
use crate::shape::ScalarType;

/// Compile UFF pose models into device plans and run batched inference.
#[derive(Parser, Debug)]
#[command(name = "uff-runner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML config file. Command-line flags take precedence.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run inference on a JSON input tensor.
    Infer {
        #[command(flatten)]
        runner: RunnerArgs,

        /// Path to input data file (JSON with `data` and `shape`).
        #[arg(short, long)]
        input: PathBuf,

        /// Output format (json, pretty).
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Compile the model and print its bindings.
    Info {
        #[command(flatten)]
        runner: RunnerArgs,
    },
}

/// Options shared by every command that builds a runner.
#[derive(Args, Debug, Default)]
pub struct RunnerArgs {
    /// Path to the model description.
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Backend (host, tensorrt).
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Image input height.
    #[arg(long)]
    pub height: Option<usize>,

    /// Image input width.
    #[arg(long)]
    pub width: Option<usize>,

    /// Largest batch the plan accepts.
    #[arg(long)]
    pub max_batch_size: Option<usize>,

    /// Plan precision (fp32, fp16, int8).
    #[arg(short, long)]
    pub precision: Option<String>,
}

/// Fully resolved runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub model: PathBuf,
    pub backend: BackendKind,
    pub input_height: usize,
    pub input_width: usize,
    pub max_batch_size: usize,
    pub precision: ScalarType,
}

impl RunnerArgs {
    /// Merge flags over `config`.
    pub fn resolve(&self, config: &Config) -> Result<RunnerSettings> {
        let model = self
            .model
            .clone()
            .or_else(|| config.model.path.clone())
            .ok_or_else(|| RunnerError::config("no model given (--model or model.path)"))?;
        let backend = match &self.backend {
            Some(s) => s.parse()?,
            None => config.model.backend,
        };
        let precision = match &self.precision {
            Some(s) => s.parse()?,
            None => config.model.precision()?,
        };
        Ok(RunnerSettings {
            model,
            backend,
            input_height: self.height.unwrap_or(config.model.input_height),
            input_width: self.width.unwrap_or(config.model.input_width),
            max_batch_size: self.max_batch_size.unwrap_or(config.inference.max_batch_size),
            precision,
        })
    }
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
