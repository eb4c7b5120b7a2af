//! Plan compilation.

use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info_span};

use super::backend::{Backend, InputSpec, ModelParser, OutputSpec};
use crate::error::{CompileStage, Result, RunnerError};
use crate::logging::{LogSink, Severity};
use crate::shape::ScalarType;

/// Compile `model` into a plan for `backend`.
///
/// Inputs are registered in channel-first order and every output is retained
/// in the plan. Any failure to read, parse, or build the model is logged as
/// ERROR through `sink`, naming the requested precision, and returned as
/// [`RunnerError::Compilation`]. Whether that is fatal is up to the caller.
pub fn compile<B: Backend>(
    backend: &B,
    model: &Path,
    inputs: &[InputSpec],
    outputs: &[OutputSpec],
    max_batch_size: usize,
    precision: ScalarType,
    sink: &dyn LogSink,
) -> Result<B::Plan> {
    let _span = info_span!("compile", backend = backend.name(), %precision).entered();

    if max_batch_size == 0 {
        return Err(RunnerError::config("max batch size must be positive"));
    }
    check_unique(inputs.iter().map(|i| i.name.as_str()))?;
    check_unique(outputs.iter().map(|o| o.name.as_str()))?;

    let network = match parse_network(backend, model, inputs, outputs, precision) {
        Ok(network) => network,
        Err(e) => {
            sink.log(Severity::Error, &failure_message(precision));
            return Err(RunnerError::compilation(
                CompileStage::Parse,
                precision,
                e.to_string(),
            ));
        }
    };

    let reason = match backend.build_plan(network, max_batch_size) {
        Ok(Some(plan)) => return Ok(plan),
        Ok(None) => "builder produced no plan".to_string(),
        Err(e) => e.to_string(),
    };
    sink.log(Severity::Error, &failure_message(precision));
    Err(RunnerError::compilation(CompileStage::Build, precision, reason))
}

/// Register every tensor with a fresh parser and parse `model`.
///
/// The parser stays alive until the network is returned.
fn parse_network<B: Backend>(
    backend: &B,
    model: &Path,
    inputs: &[InputSpec],
    outputs: &[OutputSpec],
    precision: ScalarType,
) -> Result<<B::Parser as ModelParser>::Network> {
    if !model.exists() {
        return Err(RunnerError::FileNotFound(model.to_path_buf()));
    }
    let mut parser = backend.create_parser()?;
    for input in inputs {
        debug!(name = %input.name, shape = %input.shape, "registering input");
        parser.register_input(&input.name, &input.shape)?;
    }
    for output in outputs {
        debug!(name = %output.name, "registering output");
        parser.register_output(&output.name)?;
    }
    parser.parse(model, precision)
}

fn failure_message(precision: ScalarType) -> String {
    format!("Failed to create plan of data type: {}", precision)
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(RunnerError::config(format!("duplicate tensor name: {}", name)));
        }
    }
    Ok(())
}
