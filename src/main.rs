//! CLI entry point for uff-runner.

use anyhow::{Context, Result};
use ndarray::ArrayD;
use serde_json::Value;
use std::fs;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use uff_runner::cli::{Cli, Commands, RunnerSettings};
use uff_runner::config::Config;
use uff_runner::inference::{open_pose_runner, InferenceRunner};
use uff_runner::logging::TracingSink;

/// Get the enabled features.
fn enabled_features() -> &'static str {
    if cfg!(feature = "tensorrt") {
        "tensorrt"
    } else {
        "host"
    }
}

/// Build the runner, exiting the process if no plan can be compiled.
fn build_runner(settings: &RunnerSettings) -> Result<Box<dyn InferenceRunner>> {
    info!("Using backend: {}", settings.backend);
    info!("Compiling model: {}", settings.model.display());
    match open_pose_runner(
        settings.backend,
        &settings.model,
        settings.input_height,
        settings.input_width,
        settings.max_batch_size,
        settings.precision,
        &TracingSink,
    ) {
        Ok(runner) => Ok(runner),
        Err(e) if e.is_compilation() => {
            error!("{}", e);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse_args();

    let config = if let Some(config_path) = &cli.config {
        Config::from_yaml_file(config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Infer {
            runner,
            input,
            format,
        } => {
            let settings = runner.resolve(&config)?;
            let mut runner = build_runner(&settings)?;

            // Load input data
            info!("Loading input: {}", input.display());
            let input_json: Value = serde_json::from_str(
                &fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read input: {}", input.display()))?,
            )?;

            // Expected format: { "data": [...], "shape": [B, C, H, W] }
            let data: Vec<f32> = input_json["data"]
                .as_array()
                .context("Input must have 'data' array")?
                .iter()
                .map(|v| v.as_f64().map(|x| x as f32).context("'data' must hold numbers"))
                .collect::<Result<_>>()?;

            let shape: Vec<usize> = input_json["shape"]
                .as_array()
                .context("Input must have 'shape' array")?
                .iter()
                .map(|v| {
                    v.as_u64()
                        .map(|x| x as usize)
                        .context("'shape' must hold non-negative integers")
                })
                .collect::<Result<_>>()?;

            let input_tensor = ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data)
                .context("Failed to create input tensor")?;

            info!("Running inference...");
            let result = runner.infer(&[input_tensor.view()])?;

            info!(
                "Inference complete: {} outputs in {:.2}ms",
                result.outputs.len(),
                result.latency_ms
            );

            let output = serde_json::json!({
                "num_outputs": result.outputs.len(),
                "latency_ms": result.latency_ms,
                "memory_bytes": result.memory_bytes,
                "outputs": result.outputs.iter().map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "shape": t.shape(),
                        "numel": t.len(),
                    })
                }).collect::<Vec<_>>()
            });

            if format == "pretty" {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", serde_json::to_string(&output)?);
            }
        }

        Commands::Info { runner } => {
            let settings = runner.resolve(&config)?;

            println!("uff-runner v{}", env!("CARGO_PKG_VERSION"));
            println!("features: {}", enabled_features());
            println!();
            println!("Model: {}", settings.model.display());
            println!("Backend: {}", settings.backend);
            println!("Precision: {}", settings.precision);

            let runner = build_runner(&settings)?;
            println!("Max batch size: {}", runner.max_batch_size());
            println!("Device memory: {} bytes", runner.memory_bytes());
            for binding in runner.bindings() {
                let role = if binding.is_input { "input" } else { "output" };
                println!("  [{}] {}", role, binding);
            }
            println!("Status: OK (plan compiled successfully)");
        }
    }

    Ok(())
}
