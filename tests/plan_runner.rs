use anyhow::{Context, Result};
use approx::assert_abs_diff_eq;
use ndarray::Array4;
use std::path::PathBuf;

use uff_runner::inference::host::DeviceOp;
use uff_runner::inference::{
    create_pose_runner, HostBackend, InferenceRunner, InputSpec, OutputSpec, PlanRunner,
};
use uff_runner::{ScalarType, Severity, TensorShape};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn quiet(_: Severity, _: &str) {}

fn classifier(max_batch_size: usize) -> Result<PlanRunner<HostBackend>> {
    let runner = PlanRunner::new(
        HostBackend::new(),
        fixture("classifier.json"),
        &[InputSpec::new("image", TensorShape::chw(3, 32, 32)?)],
        &[OutputSpec::new("logits")],
        max_batch_size,
        ScalarType::Float32,
        &quiet,
    )?;
    Ok(runner)
}

fn pattern(batch_size: usize, seed: f32) -> Vec<u8> {
    let values: Vec<f32> = (0..batch_size * 3 * 32 * 32)
        .map(|i| seed + (i % 97) as f32)
        .collect();
    bytemuck::cast_slice(&values).to_vec()
}

#[test]
fn classifier_batch_of_two_writes_80_bytes() -> Result<()> {
    let mut runner = classifier(4)?;
    let journal = runner.backend().journal();
    journal.clear();

    let input = pattern(2, 0.0);
    assert_eq!(input.len(), 2 * 3 * 32 * 32 * 4);
    let mut output = vec![0u8; 80];
    runner.execute(&[input.as_slice()], &mut [output.as_mut_slice()], 2)?;

    let ops = journal.ops();
    let position = |op: &DeviceOp| ops.iter().position(|o| o == op).context("missing op");
    let copy_in = position(&DeviceOp::HostToDevice { bytes: input.len() })?;
    let compute = position(&DeviceOp::Execute { batch_size: 2 })?;
    let copy_out = position(&DeviceOp::DeviceToHost { bytes: 80 })?;
    assert!(copy_in < compute && compute < copy_out);

    let logits: Vec<f32> = output
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();
    assert_eq!(logits.len(), 20);
    assert_abs_diff_eq!(logits[3], -3.0);
    Ok(())
}

#[test]
fn output_length_tracks_batch_size() -> Result<()> {
    let mut runner = classifier(4)?;
    let journal = runner.backend().journal();
    for batch_size in 1..=4 {
        journal.clear();
        let input = pattern(batch_size, 1.0);
        let mut output = vec![0u8; 4 * 40];
        runner.execute(&[input.as_slice()], &mut [output.as_mut_slice()], batch_size)?;
        assert!(journal
            .ops()
            .contains(&DeviceOp::DeviceToHost { bytes: batch_size * 40 }));
    }
    Ok(())
}

#[test]
fn repeated_calls_are_bit_identical() -> Result<()> {
    let mut runner = classifier(3)?;
    let input = pattern(3, 0.25);
    let mut first = vec![0u8; 120];
    let mut second = vec![0u8; 120];
    runner.execute(&[input.as_slice()], &mut [first.as_mut_slice()], 3)?;
    runner.execute(&[input.as_slice()], &mut [second.as_mut_slice()], 3)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn runners_do_not_share_buffers() -> Result<()> {
    let mut small = classifier(1)?;
    let mut large = classifier(4)?;
    assert_eq!(small.backend().allocated_bytes(), 3 * 32 * 32 * 4 + 40);
    assert_eq!(large.backend().allocated_bytes(), 4 * (3 * 32 * 32 * 4 + 40));

    let mut out_small = vec![0u8; 40];
    let mut out_large = vec![0u8; 40];
    small.execute(&[pattern(1, 5.0).as_slice()], &mut [out_small.as_mut_slice()], 1)?;
    large.execute(&[pattern(1, 9.0).as_slice()], &mut [out_large.as_mut_slice()], 1)?;

    // Re-reading the first runner is unaffected by the second.
    let mut again = vec![0u8; 40];
    small.execute(&[pattern(1, 5.0).as_slice()], &mut [again.as_mut_slice()], 1)?;
    assert_eq!(out_small, again);
    assert_ne!(out_small, out_large);
    Ok(())
}

#[test]
fn pose_runner_produces_conf_and_paf() -> Result<()> {
    let mut runner = create_pose_runner(
        HostBackend::new(),
        fixture("pose.json"),
        16,
        16,
        2,
        true,
        &quiet,
    )?;

    let names: Vec<&str> = runner.bindings().iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["image", "outputs/conf", "outputs/paf"]);

    let input = Array4::<f32>::from_elem((2, 3, 16, 16), 4.0).into_dyn();
    let result = runner.infer(&[input.view()])?;
    assert_eq!(result.outputs[0].shape(), &[2, 19, 2, 2]);
    assert_eq!(result.outputs[1].shape(), &[2, 38, 2, 2]);
    for &v in result.outputs[0].data.iter() {
        assert_abs_diff_eq!(v, 4.0, epsilon = 1e-5);
    }
    for &v in result.outputs[1].data.iter() {
        assert_abs_diff_eq!(v, 2.0, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn boxed_runner_is_usable_through_the_trait() -> Result<()> {
    let mut runner: Box<dyn InferenceRunner> = Box::new(classifier(2)?);
    let input = pattern(2, 0.0);
    let mut output = vec![0u8; 80];
    runner.execute(&[input.as_slice()], &mut [output.as_mut_slice()], 2)?;
    assert_eq!(runner.max_batch_size(), 2);
    Ok(())
}
