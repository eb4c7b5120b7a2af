//! The inference runner: owns a compiled plan and its device buffers.

use ndarray::{ArrayD, ArrayViewD, CowArray, IxDyn};
use std::path::Path;
use std::time::Instant;
use tracing::{debug_span, info};

use super::backend::{
    Backend, Binding, CompiledPlan, DeviceBuffer, ExecutionContext, InputSpec, OutputSpec,
};
use super::buffers::allocate_buffers;
use super::compiler::compile;
use crate::error::{Result, RunnerError};
use crate::logging::LogSink;
use crate::shape::ScalarType;

/// Output tensor of a convenience inference call.
#[derive(Debug, Clone)]
pub struct TensorData {
    /// Binding name.
    pub name: String,
    /// Values shaped `(batch, ..binding shape)`.
    pub data: ArrayD<f32>,
}

impl TensorData {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Get the total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of [`InferenceRunner::infer`].
#[derive(Debug)]
pub struct InferenceResult {
    /// Output tensors, in output binding order.
    pub outputs: Vec<TensorData>,
    /// Wall time of the execute cycle in milliseconds.
    pub latency_ms: f64,
    /// Device memory held by the runner in bytes.
    pub memory_bytes: usize,
}

/// Anything that can run batched inference over raw host buffers.
///
/// Host buffers are matched to bindings by position within the input and
/// output subsequences of [`bindings`](Self::bindings), not by name.
pub trait InferenceRunner {
    /// Copy `inputs` to the device, run the plan for `batch_size` samples and
    /// copy the results into `outputs`.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero or exceeds
    /// [`max_batch_size`](Self::max_batch_size).
    fn execute(&mut self, inputs: &[&[u8]], outputs: &mut [&mut [u8]], batch_size: usize)
        -> Result<()>;

    /// Bindings in plan order.
    fn bindings(&self) -> &[Binding];

    /// Largest batch accepted by [`execute`](Self::execute).
    fn max_batch_size(&self) -> usize;

    /// Device memory held by the runner in bytes.
    fn memory_bytes(&self) -> usize;

    /// Run inference on float32 arrays shaped `(batch, ..binding shape)`.
    ///
    /// The batch size is the leading dimension of the inputs. Unlike
    /// [`execute`](Self::execute), an out-of-range batch is reported as an
    /// error since it comes from data rather than from the caller's code.
    fn infer(&mut self, inputs: &[ArrayViewD<'_, f32>]) -> Result<InferenceResult> {
        let (input_bindings, output_bindings): (Vec<&Binding>, Vec<&Binding>) =
            self.bindings().iter().partition(|b| b.is_input);
        if inputs.len() != input_bindings.len() {
            return Err(RunnerError::binding_mismatch(format!(
                "expected {} inputs, got {}",
                input_bindings.len(),
                inputs.len()
            )));
        }

        let batch_size = inputs.first().and_then(|a| a.shape().first().copied()).unwrap_or(0);
        if batch_size == 0 || batch_size > self.max_batch_size() {
            return Err(RunnerError::binding_mismatch(format!(
                "batch size {} outside 1..={}",
                batch_size,
                self.max_batch_size()
            )));
        }

        for (binding, input) in input_bindings.iter().zip(inputs) {
            check_f32(binding)?;
            let expected = batched_shape(binding, batch_size);
            if input.shape() != expected.as_slice() {
                return Err(RunnerError::binding_mismatch(format!(
                    "input {} has shape {:?}, expected {:?}",
                    binding.name,
                    input.shape(),
                    expected
                )));
            }
        }
        for binding in &output_bindings {
            check_f32(binding)?;
        }

        let contiguous: Vec<CowArray<'_, f32, IxDyn>> =
            inputs.iter().map(|a| a.as_standard_layout()).collect();
        let host_inputs = contiguous
            .iter()
            .map(|a| {
                a.as_slice()
                    .map(bytemuck::cast_slice::<f32, u8>)
                    .ok_or_else(|| RunnerError::binding_mismatch("input is not contiguous"))
            })
            .collect::<Result<Vec<&[u8]>>>()?;

        let output_meta: Vec<(String, Vec<usize>)> = output_bindings
            .iter()
            .map(|b| (b.name.clone(), batched_shape(b, batch_size)))
            .collect();
        let mut host_outputs: Vec<Vec<f32>> = output_meta
            .iter()
            .map(|(_, shape)| vec![0.0; shape.iter().product()])
            .collect();

        let start = Instant::now();
        {
            let mut views: Vec<&mut [u8]> = host_outputs
                .iter_mut()
                .map(|v| bytemuck::cast_slice_mut::<f32, u8>(v.as_mut_slice()))
                .collect();
            self.execute(&host_inputs, &mut views, batch_size)?;
        }
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let outputs = output_meta
            .into_iter()
            .zip(host_outputs)
            .map(|((name, shape), values)| {
                ArrayD::from_shape_vec(IxDyn(&shape), values)
                    .map(|data| TensorData { name, data })
                    .map_err(|e| RunnerError::shape(format!("Array shape error: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InferenceResult {
            outputs,
            latency_ms,
            memory_bytes: self.memory_bytes(),
        })
    }
}

fn check_f32(binding: &Binding) -> Result<()> {
    if binding.scalar_type == ScalarType::Float32 {
        Ok(())
    } else {
        Err(RunnerError::binding_mismatch(format!(
            "binding {} is {}, array inference needs fp32",
            binding.name, binding.scalar_type
        )))
    }
}

fn batched_shape(binding: &Binding, batch_size: usize) -> Vec<usize> {
    std::iter::once(batch_size)
        .chain(binding.shape.dims().iter().copied())
        .collect()
}

/// Runner backed by a compiled plan.
///
/// Device buffers are allocated once for `max_batch_size` samples and reused
/// by every call; smaller batches use a prefix of each buffer. `execute`
/// takes `&mut self`, so calls on one runner never overlap. Callers that
/// need concurrent inference should create one runner each.
pub struct PlanRunner<B: Backend> {
    max_batch_size: usize,
    buffers: Vec<B::Buffer>,
    plan: B::Plan,
    backend: B,
}

impl<B: Backend> PlanRunner<B> {
    /// Compile `model` and allocate the plan's device buffers.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Compilation`] if the model cannot be turned
    /// into a plan, or a device error if buffers cannot be allocated.
    /// Parser resources are released on every failure path.
    pub fn new(
        backend: B,
        model: impl AsRef<Path>,
        inputs: &[InputSpec],
        outputs: &[OutputSpec],
        max_batch_size: usize,
        precision: ScalarType,
        sink: &dyn LogSink,
    ) -> Result<Self> {
        let model = model.as_ref();
        let built = compile(
            &backend,
            model,
            inputs,
            outputs,
            max_batch_size,
            precision,
            sink,
        )
        .and_then(|plan| {
            let buffers = allocate_buffers(&backend, &plan, max_batch_size, sink)?;
            Ok((plan, buffers))
        });

        match built {
            Ok((plan, buffers)) => {
                info!(
                    backend = backend.name(),
                    bindings = plan.bindings().len(),
                    max_batch_size,
                    "Plan ready: {}",
                    model.display()
                );
                Ok(Self {
                    max_batch_size,
                    buffers,
                    plan,
                    backend,
                })
            }
            Err(e) => {
                backend.release_parser_resources();
                Err(e)
            }
        }
    }

    /// The backend this runner drives.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Reject host buffer sets that do not line up with the bindings.
    fn check_host_buffers(
        &self,
        inputs: &[&[u8]],
        outputs: &[&mut [u8]],
        batch_size: usize,
    ) -> Result<()> {
        let bindings = self.plan.bindings();
        let n_inputs = bindings.iter().filter(|b| b.is_input).count();
        let n_outputs = bindings.len() - n_inputs;
        if inputs.len() != n_inputs || outputs.len() != n_outputs {
            return Err(RunnerError::binding_mismatch(format!(
                "plan has {} inputs and {} outputs, got {} and {} host buffers",
                n_inputs,
                n_outputs,
                inputs.len(),
                outputs.len()
            )));
        }

        let host_lens = inputs
            .iter()
            .map(|b| b.len())
            .zip(bindings.iter().filter(|b| b.is_input))
            .chain(
                outputs
                    .iter()
                    .map(|b| b.len())
                    .zip(bindings.iter().filter(|b| !b.is_input)),
            );
        for (len, binding) in host_lens {
            let needed = binding.bytes_for_batch(batch_size)?;
            if len < needed {
                return Err(RunnerError::binding_mismatch(format!(
                    "host buffer for {} holds {} bytes, {} needed",
                    binding.name, len, needed
                )));
            }
        }
        Ok(())
    }
}

impl<B: Backend> InferenceRunner for PlanRunner<B> {
    fn execute(
        &mut self,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
        batch_size: usize,
    ) -> Result<()> {
        assert!(batch_size > 0, "batch size must be positive");
        assert!(
            batch_size <= self.max_batch_size,
            "batch size {} exceeds max batch size {}",
            batch_size,
            self.max_batch_size
        );
        self.check_host_buffers(inputs, outputs, batch_size)?;

        let bindings = self.plan.bindings();

        {
            let _span = debug_span!("copy_in", batch_size).entered();
            let slots = bindings
                .iter()
                .zip(self.buffers.iter_mut())
                .filter(|(b, _)| b.is_input);
            for ((binding, buffer), host) in slots.zip(inputs) {
                let bytes = batch_size * binding.bytes_per_sample();
                buffer.copy_from_host(&host[..bytes])?;
            }
        }

        {
            let _span = debug_span!("execute", batch_size).entered();
            let mut context = self.plan.create_execution_context()?;
            context.execute(batch_size, &mut self.buffers)?;
        }

        {
            let _span = debug_span!("copy_out", batch_size).entered();
            let slots = bindings
                .iter()
                .zip(self.buffers.iter())
                .filter(|(b, _)| !b.is_input);
            for ((binding, buffer), host) in slots.zip(outputs.iter_mut()) {
                let bytes = batch_size * binding.bytes_per_sample();
                buffer.copy_to_host(&mut host[..bytes])?;
            }
        }

        Ok(())
    }

    fn bindings(&self) -> &[Binding] {
        self.plan.bindings()
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn memory_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }
}

impl<B: Backend> Drop for PlanRunner<B> {
    fn drop(&mut self) {
        self.backend.release_parser_resources();
    }
}
