//! Fixed-signature runner for pose estimation networks.

use std::path::Path;

use super::backend::{Backend, BackendKind, InputSpec, OutputSpec};
use super::host::HostBackend;
use super::runner::{InferenceRunner, PlanRunner};
use crate::error::Result;
use crate::logging::LogSink;
use crate::shape::{ScalarType, TensorShape};

/// Name of the single image input.
pub const IMAGE_INPUT: &str = "image";

/// Confidence map output.
pub const CONF_OUTPUT: &str = "outputs/conf";

/// Part affinity field output.
pub const PAF_OUTPUT: &str = "outputs/paf";

/// Inputs and outputs of a pose network taking `(3, height, width)` images.
pub fn pose_specs(input_height: usize, input_width: usize) -> Result<(Vec<InputSpec>, Vec<OutputSpec>)> {
    let inputs = vec![InputSpec::new(
        IMAGE_INPUT,
        TensorShape::chw(3, input_height, input_width)?,
    )];
    let outputs = vec![OutputSpec::new(CONF_OUTPUT), OutputSpec::new(PAF_OUTPUT)];
    Ok((inputs, outputs))
}

/// Build a pose runner on `backend`, in fp16 when `use_f16` is set.
pub fn create_pose_runner<B: Backend>(
    backend: B,
    model: impl AsRef<Path>,
    input_height: usize,
    input_width: usize,
    max_batch_size: usize,
    use_f16: bool,
    sink: &dyn LogSink,
) -> Result<PlanRunner<B>> {
    let precision = if use_f16 {
        ScalarType::Float16
    } else {
        ScalarType::Float32
    };
    let (inputs, outputs) = pose_specs(input_height, input_width)?;
    PlanRunner::new(
        backend,
        model,
        &inputs,
        &outputs,
        max_batch_size,
        precision,
        sink,
    )
}

/// Build a pose runner on a backend chosen at runtime.
pub fn open_pose_runner(
    kind: BackendKind,
    model: impl AsRef<Path>,
    input_height: usize,
    input_width: usize,
    max_batch_size: usize,
    precision: ScalarType,
    sink: &dyn LogSink,
) -> Result<Box<dyn InferenceRunner>> {
    let (inputs, outputs) = pose_specs(input_height, input_width)?;
    match kind {
        BackendKind::Host => Ok(Box::new(PlanRunner::new(
            HostBackend::new(),
            model,
            &inputs,
            &outputs,
            max_batch_size,
            precision,
            sink,
        )?)),
        #[cfg(feature = "tensorrt")]
        BackendKind::TensorRt => Ok(Box::new(PlanRunner::new(
            super::tensorrt::TensorRtBackend::new(),
            model,
            &inputs,
            &outputs,
            max_batch_size,
            precision,
            sink,
        )?)),
        #[cfg(not(feature = "tensorrt"))]
        BackendKind::TensorRt => Err(crate::error::RunnerError::config(
            "built without the `tensorrt` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_signature() {
        let (inputs, outputs) = pose_specs(368, 432).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "image");
        assert_eq!(inputs[0].shape.dims(), &[3, 368, 432]);
        let names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["outputs/conf", "outputs/paf"]);
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        assert!(pose_specs(0, 432).is_err());
    }

    #[cfg(not(feature = "tensorrt"))]
    #[test]
    fn tensorrt_needs_the_feature() {
        use crate::logging::Severity;

        let quiet = |_: Severity, _: &str| {};
        let result = open_pose_runner(
            BackendKind::TensorRt,
            "model.uff",
            368,
            432,
            1,
            ScalarType::Float32,
            &quiet,
        );
        assert!(result.is_err());
    }
}
