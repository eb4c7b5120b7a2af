//! Device buffer allocation for a compiled plan.

use tracing::debug;

use super::backend::{Backend, CompiledPlan};
use crate::error::Result;
use crate::logging::{LogSink, Severity};

/// Allocate one device buffer per binding of `plan`, in binding order, each
/// holding `batch_size` samples.
///
/// Every binding is described on `sink` at INFO level. If an allocation
/// fails, buffers allocated so far are released before the error returns.
pub fn allocate_buffers<B: Backend>(
    backend: &B,
    plan: &B::Plan,
    batch_size: usize,
    sink: &dyn LogSink,
) -> Result<Vec<B::Buffer>> {
    plan.bindings()
        .iter()
        .map(|binding| {
            sink.log(Severity::Info, &binding.to_string());
            let bytes = binding.bytes_for_batch(batch_size)?;
            debug!(index = binding.index, bytes, "allocating device buffer");
            backend.allocate(bytes)
        })
        .collect()
}
