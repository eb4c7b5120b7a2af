//! Plan compilation and batched inference.
//!
//! A [`PlanRunner`] compiles a model once through a [`Backend`], allocates
//! one device buffer per plan binding, and then runs any number of
//! copy-in / execute / copy-out cycles. The host backend always builds; the
//! TensorRT backend needs the `tensorrt` feature and the native bridge.

mod backend;
mod buffers;
mod compiler;
pub mod host;
mod pose;
mod runner;

#[cfg(feature = "tensorrt")]
mod ffi;
#[cfg(feature = "tensorrt")]
pub mod tensorrt;

pub use backend::{
    Backend, BackendKind, Binding, CompiledPlan, DeviceBuffer, ExecutionContext, InputSpec,
    ModelParser, OutputSpec,
};
pub use buffers::allocate_buffers;
pub use compiler::compile;
pub use host::HostBackend;
pub use pose::{
    create_pose_runner, open_pose_runner, pose_specs, CONF_OUTPUT, IMAGE_INPUT, PAF_OUTPUT,
};
pub use runner::{InferenceResult, InferenceRunner, PlanRunner, TensorData};
