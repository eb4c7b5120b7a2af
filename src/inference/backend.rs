//! Backend abstraction: the device runtime and model parser a runner drives.
//!
//! A [`Backend`] bundles the external collaborators of the pipeline: a model
//! parser, a plan builder, and device memory. [`PlanRunner`](super::PlanRunner)
//! is generic over it, so the compile/allocate/execute logic is written once.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, RunnerError};
use crate::shape::{ScalarType, TensorShape};

/// A named network input with its channel-first per-sample shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    pub shape: TensorShape,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, shape: TensorShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }
}

/// A named network output. Its shape comes from the compiled plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A typed, shaped tensor slot declared by a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Position in the plan's binding order.
    pub index: usize,
    pub name: String,
    pub scalar_type: ScalarType,
    /// Per-sample shape, batch dimension excluded.
    pub shape: TensorShape,
    pub is_input: bool,
}

impl Binding {
    /// Bytes occupied by one sample of this binding.
    pub fn bytes_per_sample(&self) -> usize {
        self.shape.bytes_per_sample(self.scalar_type)
    }

    /// Bytes occupied by `batch_size` samples, or an error if that overflows.
    pub fn bytes_for_batch(&self, batch_size: usize) -> Result<usize> {
        batch_size
            .checked_mul(self.bytes_per_sample())
            .ok_or_else(|| {
                RunnerError::shape(format!(
                    "{} samples of {} {} overflow usize",
                    batch_size, self.name, self.shape
                ))
            })
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "binding {}: name: {} type {} {}",
            self.index, self.name, self.scalar_type, self.shape
        )
    }
}

/// Translates a model description into a backend network.
pub trait ModelParser {
    type Network;

    /// Register an input tensor. `shape` is always channel-first.
    fn register_input(&mut self, name: &str, shape: &TensorShape) -> Result<()>;

    /// Register a tensor to retain as a plan output.
    fn register_output(&mut self, name: &str) -> Result<()>;

    /// Parse the model at `model` with weights in `precision`.
    fn parse(&mut self, model: &Path, precision: ScalarType) -> Result<Self::Network>;
}

/// A fixed-size device allocation.
pub trait DeviceBuffer {
    /// Capacity in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `src` into the first `src.len()` bytes of the buffer.
    fn copy_from_host(&mut self, src: &[u8]) -> Result<()>;

    /// Copy the first `dst.len()` bytes of the buffer into `dst`.
    fn copy_to_host(&self, dst: &mut [u8]) -> Result<()>;
}

/// Short-lived handle that runs one device pass over a plan's buffers.
pub trait ExecutionContext {
    type Buffer: DeviceBuffer;

    /// Run the plan for `batch_size` samples. `buffers` is indexed by
    /// binding index: inputs are read, outputs are written.
    fn execute(&mut self, batch_size: usize, buffers: &mut [Self::Buffer]) -> Result<()>;
}

/// Device-resident execution plan.
pub trait CompiledPlan {
    type Buffer: DeviceBuffer;
    type Context<'a>: ExecutionContext<Buffer = Self::Buffer>
    where
        Self: 'a;

    /// Bindings in plan order.
    fn bindings(&self) -> &[Binding];

    /// Largest batch the plan was built for.
    fn max_batch_size(&self) -> usize;

    fn create_execution_context(&self) -> Result<Self::Context<'_>>;
}

/// Device runtime plus model parser.
pub trait Backend {
    type Parser: ModelParser;
    type Buffer: DeviceBuffer;
    type Plan: CompiledPlan<Buffer = Self::Buffer>;

    fn name(&self) -> &'static str;

    fn create_parser(&self) -> Result<Self::Parser>;

    /// Build a plan from a parsed network. `Ok(None)` means the builder
    /// could not produce a plan.
    fn build_plan(
        &self,
        network: <Self::Parser as ModelParser>::Network,
        max_batch_size: usize,
    ) -> Result<Option<Self::Plan>>;

    /// Allocate `bytes` of device memory.
    fn allocate(&self, bytes: usize) -> Result<Self::Buffer>;

    /// Release process-wide resources held by the parsing library.
    fn release_parser_resources(&self) {}
}

/// Backends selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Software reference device.
    #[default]
    Host,
    /// TensorRT with the UFF parser.
    TensorRt,
}

impl FromStr for BackendKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "tensorrt" | "trt" => Ok(Self::TensorRt),
            other => Err(RunnerError::config(format!("Invalid backend: {}", other))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::TensorRt => write!(f, "tensorrt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_description() {
        let binding = Binding {
            index: 1,
            name: "outputs/conf".into(),
            scalar_type: ScalarType::Float32,
            shape: TensorShape::chw(19, 46, 54).unwrap(),
            is_input: false,
        };
        assert_eq!(
            binding.to_string(),
            "binding 1: name: outputs/conf type fp32 (19, 46, 54)"
        );
        assert_eq!(binding.bytes_per_sample(), 19 * 46 * 54 * 4);
        assert_eq!(binding.bytes_for_batch(2).unwrap(), 2 * 19 * 46 * 54 * 4);
        assert!(matches!(
            binding.bytes_for_batch(usize::MAX),
            Err(RunnerError::Shape(_))
        ));
    }

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("host".parse::<BackendKind>().unwrap(), BackendKind::Host);
        assert_eq!("TRT".parse::<BackendKind>().unwrap(), BackendKind::TensorRt);
        assert!("onnx".parse::<BackendKind>().is_err());
    }
}
