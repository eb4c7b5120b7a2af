//! Software reference device.
//!
//! Runs plans on the CPU with plain byte vectors standing in for device
//! memory. Model descriptions are JSON documents listing the output tensors
//! the network produces and the per-sample operation that computes each one
//! from the first input:
//!
//! ```json
//! {
//!   "name": "pose",
//!   "outputs": [
//!     { "name": "outputs/conf", "shape": [19, 46, 54], "op": { "kind": "mean" } },
//!     { "name": "outputs/paf", "shape": [38, 46, 54], "op": { "kind": "scale", "factor": 0.5 } }
//!   ]
//! }
//! ```
//!
//! Every device operation is recorded in a [`Journal`] so callers can
//! observe copy and execution order.

use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::backend::{Backend, Binding, CompiledPlan, DeviceBuffer, ExecutionContext, ModelParser};
use crate::error::{Result, RunnerError};
use crate::shape::{ScalarType, TensorShape};

/// A device operation observed by the host backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Allocate { bytes: usize },
    HostToDevice { bytes: usize },
    ContextCreated,
    Execute { batch_size: usize },
    ContextDestroyed,
    DeviceToHost { bytes: usize },
    ParserReleased,
}

/// Shared, append-only record of device operations.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<DeviceOp>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, op: DeviceOp) {
        self.0.lock().push(op);
    }

    /// Operations recorded so far, oldest first.
    pub fn ops(&self) -> Vec<DeviceOp> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Per-sample operation producing an output from the first input.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostOp {
    /// Every element set to `value`.
    Fill { value: f32 },
    /// Every element set to the sum of the input sample.
    Sum,
    /// Every element set to the mean of the input sample.
    Mean,
    /// Element `k` is input element `k mod n` times `factor`.
    Scale { factor: f32 },
}

impl HostOp {
    fn apply(self, input: &[f32], volume: usize) -> Vec<f32> {
        match self {
            Self::Fill { value } => vec![value; volume],
            Self::Sum => vec![input.iter().sum::<f32>(); volume],
            Self::Mean => {
                let mean = input.iter().sum::<f32>() / input.len() as f32;
                vec![mean; volume]
            }
            Self::Scale { factor } => (0..volume)
                .map(|k| input[k % input.len()] * factor)
                .collect(),
        }
    }
}

/// One output tensor of a host model.
#[derive(Debug, Clone, Deserialize)]
pub struct HostLayer {
    pub name: String,
    pub shape: TensorShape,
    pub op: HostOp,
}

/// JSON model description understood by [`HostParser`].
#[derive(Debug, Clone, Deserialize)]
pub struct HostModel {
    #[serde(default)]
    pub name: String,
    pub outputs: Vec<HostLayer>,
}

/// Network produced by [`HostParser::parse`].
#[derive(Debug, Clone)]
pub struct HostNetwork {
    inputs: Vec<(String, TensorShape)>,
    outputs: Vec<HostLayer>,
}

/// Parser for JSON host models.
#[derive(Debug)]
pub struct HostParser {
    inputs: Vec<(String, TensorShape)>,
    outputs: Vec<String>,
}

impl ModelParser for HostParser {
    type Network = HostNetwork;

    fn register_input(&mut self, name: &str, shape: &TensorShape) -> Result<()> {
        if shape.rank() != 3 {
            return Err(RunnerError::shape(format!(
                "input {} must be (C, H, W), got {}",
                name, shape
            )));
        }
        self.inputs.push((name.to_string(), shape.clone()));
        Ok(())
    }

    fn register_output(&mut self, name: &str) -> Result<()> {
        self.outputs.push(name.to_string());
        Ok(())
    }

    fn parse(&mut self, model: &Path, precision: ScalarType) -> Result<HostNetwork> {
        if precision == ScalarType::Int8 {
            return Err(RunnerError::config("host device has no int8 kernels"));
        }
        if self.inputs.is_empty() {
            return Err(RunnerError::config("host models need at least one input"));
        }

        let content = std::fs::read_to_string(model)?;
        let description: HostModel = serde_json::from_str(&content)?;
        debug!(model = %description.name, layers = description.outputs.len(), "parsed host model");

        let outputs = self
            .outputs
            .iter()
            .map(|name| {
                description
                    .outputs
                    .iter()
                    .find(|layer| &layer.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        RunnerError::config(format!(
                            "output {} not found in model {}",
                            name,
                            model.display()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(HostNetwork {
            inputs: self.inputs.clone(),
            outputs,
        })
    }
}

/// Host memory standing in for a device allocation.
#[derive(Debug)]
pub struct HostBuffer {
    data: Vec<u8>,
    allocated: Arc<AtomicUsize>,
    journal: Journal,
}

impl HostBuffer {
    fn sample(&self, index: usize, bytes_per_sample: usize) -> Vec<f32> {
        self.data[index * bytes_per_sample..(index + 1) * bytes_per_sample]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect()
    }

    fn write_sample(&mut self, index: usize, values: &[f32]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let start = index * bytes.len();
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl DeviceBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn copy_from_host(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.data.len() {
            return Err(RunnerError::device(format!(
                "copy of {} bytes into a {} byte buffer",
                src.len(),
                self.data.len()
            )));
        }
        self.data[..src.len()].copy_from_slice(src);
        self.journal.record(DeviceOp::HostToDevice { bytes: src.len() });
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.data.len() {
            return Err(RunnerError::device(format!(
                "copy of {} bytes out of a {} byte buffer",
                dst.len(),
                self.data.len()
            )));
        }
        dst.copy_from_slice(&self.data[..dst.len()]);
        self.journal.record(DeviceOp::DeviceToHost { bytes: dst.len() });
        Ok(())
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.data.len(), Ordering::SeqCst);
    }
}

/// Plan compiled for the host device.
#[derive(Debug)]
pub struct HostPlan {
    bindings: Vec<Binding>,
    ops: Vec<Option<HostOp>>,
    max_batch_size: usize,
    journal: Journal,
}

impl CompiledPlan for HostPlan {
    type Buffer = HostBuffer;
    type Context<'a> = HostContext<'a>;

    fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn create_execution_context(&self) -> Result<HostContext<'_>> {
        self.journal.record(DeviceOp::ContextCreated);
        Ok(HostContext { plan: self })
    }
}

/// Execution context over a [`HostPlan`].
#[derive(Debug)]
pub struct HostContext<'a> {
    plan: &'a HostPlan,
}

impl ExecutionContext for HostContext<'_> {
    type Buffer = HostBuffer;

    fn execute(&mut self, batch_size: usize, buffers: &mut [HostBuffer]) -> Result<()> {
        let plan = self.plan;
        plan.journal.record(DeviceOp::Execute { batch_size });
        if batch_size > plan.max_batch_size {
            return Err(RunnerError::device(format!(
                "batch size {} exceeds plan maximum {}",
                batch_size, plan.max_batch_size
            )));
        }
        if buffers.len() != plan.bindings.len() {
            return Err(RunnerError::device(format!(
                "plan has {} bindings, {} buffers bound",
                plan.bindings.len(),
                buffers.len()
            )));
        }

        let source = plan
            .bindings
            .iter()
            .find(|b| b.is_input)
            .ok_or_else(|| RunnerError::device("plan has no input binding"))?;

        for sample in 0..batch_size {
            let input = buffers[source.index].sample(sample, source.bytes_per_sample());
            for (binding, op) in plan.bindings.iter().zip(&plan.ops) {
                if let Some(op) = op {
                    let values = op.apply(&input, binding.shape.volume());
                    buffers[binding.index].write_sample(sample, &values);
                }
            }
        }
        Ok(())
    }
}

impl Drop for HostContext<'_> {
    fn drop(&mut self) {
        self.plan.journal.record(DeviceOp::ContextDestroyed);
    }
}

/// The host backend.
#[derive(Debug, Clone, Default)]
pub struct HostBackend {
    journal: Journal,
    memory_limit: Option<usize>,
    allocated: Arc<AtomicUsize>,
}

impl HostBackend {
    /// Create a host backend with unlimited memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host backend whose allocations fail beyond `bytes` in total.
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    /// Handle to the journal of device operations.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }
}

impl Backend for HostBackend {
    type Parser = HostParser;
    type Buffer = HostBuffer;
    type Plan = HostPlan;

    fn name(&self) -> &'static str {
        "host"
    }

    fn create_parser(&self) -> Result<HostParser> {
        Ok(HostParser {
            inputs: Vec::new(),
            outputs: Vec::new(),
        })
    }

    fn build_plan(&self, network: HostNetwork, max_batch_size: usize) -> Result<Option<HostPlan>> {
        if network.outputs.is_empty() || max_batch_size == 0 {
            return Ok(None);
        }

        let inputs = network.inputs.into_iter().map(|(name, shape)| (name, shape, None));
        let outputs = network
            .outputs
            .into_iter()
            .map(|layer| (layer.name, layer.shape, Some(layer.op)));

        let (bindings, ops) = inputs
            .chain(outputs)
            .enumerate()
            .map(|(index, (name, shape, op))| {
                let binding = Binding {
                    index,
                    name,
                    scalar_type: ScalarType::Float32,
                    shape,
                    is_input: op.is_none(),
                };
                (binding, op)
            })
            .unzip();

        Ok(Some(HostPlan {
            bindings,
            ops,
            max_batch_size,
            journal: self.journal.clone(),
        }))
    }

    fn allocate(&self, bytes: usize) -> Result<HostBuffer> {
        let limit = self.memory_limit.unwrap_or(usize::MAX);
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                held.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map_err(|held| {
                RunnerError::device(format!(
                    "out of memory: {} bytes requested, {} of {} in use",
                    bytes, held, limit
                ))
            })?;
        self.journal.record(DeviceOp::Allocate { bytes });
        Ok(HostBuffer {
            data: vec![0; bytes],
            allocated: Arc::clone(&self.allocated),
            journal: self.journal.clone(),
        })
    }

    fn release_parser_resources(&self) {
        self.journal.record(DeviceOp::ParserReleased);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_apply_per_sample() {
        let input = [1.0, 2.0, 3.0];
        assert_eq!(HostOp::Fill { value: 0.5 }.apply(&input, 2), vec![0.5, 0.5]);
        assert_eq!(HostOp::Sum.apply(&input, 2), vec![6.0, 6.0]);
        assert_eq!(HostOp::Mean.apply(&input, 1), vec![2.0]);
        assert_eq!(
            HostOp::Scale { factor: 2.0 }.apply(&input, 5),
            vec![2.0, 4.0, 6.0, 2.0, 4.0]
        );
    }

    #[test]
    fn op_json_format() {
        let op: HostOp = serde_json::from_str(r#"{"kind": "scale", "factor": 3.0}"#).unwrap();
        assert_eq!(op, HostOp::Scale { factor: 3.0 });
        let op: HostOp = serde_json::from_str(r#"{"kind": "mean"}"#).unwrap();
        assert_eq!(op, HostOp::Mean);
    }

    #[test]
    fn int8_is_rejected_at_parse() {
        let mut parser = HostBackend::new().create_parser().unwrap();
        parser
            .register_input("image", &TensorShape::chw(3, 4, 4).unwrap())
            .unwrap();
        let err = parser
            .parse(Path::new("unused.json"), ScalarType::Int8)
            .unwrap_err();
        assert!(err.to_string().contains("int8"));
    }

    #[test]
    fn buffers_are_independent() {
        let backend = HostBackend::new();
        let mut a = backend.allocate(8).unwrap();
        let b = backend.allocate(8).unwrap();
        a.copy_from_host(&[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        b.copy_to_host(&mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0]);
        a.copy_to_host(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(backend.allocated_bytes(), 16);

        assert!(a.copy_from_host(&[0; 9]).is_err());
        drop(a);
        assert_eq!(backend.allocated_bytes(), 8);
    }

    #[test]
    fn memory_limit_holds_across_threads() {
        let backend = HostBackend::with_memory_limit(100);
        let held: Vec<HostBuffer> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let backend = backend.clone();
                    scope.spawn(move || {
                        (0..4)
                            .filter_map(|_| backend.allocate(20).ok())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        assert_eq!(held.len(), 5);
        assert_eq!(backend.allocated_bytes(), 100);
        assert!(matches!(backend.allocate(1), Err(RunnerError::Device(_))));
    }
}
