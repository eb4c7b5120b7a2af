//! uff-runner: compile UFF models into device execution plans and run
//! batched inference against them from Rust.
//!
//! Construction compiles the model once and allocates one device buffer per
//! plan binding, sized for the maximum batch. Each inference call then copies
//! the host inputs in, runs the plan, and copies the outputs back.
//!
//! # Features
//!
//! - **tensorrt**: Build the TensorRT backend (requires TensorRT and CUDA)
//!
//! Without features only the host backend is available, a software device
//! that runs JSON model descriptions on the CPU.
//!
//! # Example
//!
//! ```ignore
//! use uff_runner::inference::{create_pose_runner, HostBackend, InferenceRunner};
//! use uff_runner::logging::TracingSink;
//! use ndarray::Array4;
//!
//! // Compile the plan and allocate buffers for batches of up to 4 images
//! let mut runner = create_pose_runner(HostBackend::new(), "pose.json", 368, 432, 4, false, &TracingSink)?;
//!
//! // Input tensor (B, C, H, W)
//! let input = Array4::<f32>::zeros((2, 3, 368, 432)).into_dyn();
//! let result = runner.infer(&[input.view()])?;
//! println!("Got {} outputs in {:.2}ms", result.outputs.len(), result.latency_ms);
//! ```
//!
//! # Building
//!
//! ```bash
//! # Host backend only
//! cargo build --release
//!
//! # With TensorRT
//! TENSORRT_ROOT=/opt/tensorrt cargo build --release --features tensorrt
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod logging;
pub mod shape;

// Re-export commonly used types
pub use error::{Result, RunnerError};
pub use inference::{
    create_pose_runner, HostBackend, InferenceResult, InferenceRunner, PlanRunner, TensorData,
};
pub use logging::{LogSink, Severity, TracingSink};
pub use shape::{ScalarType, TensorShape};
