//! TensorRT backend over the native bridge.
//!
//! Models are UFF files parsed with the TensorRT UFF parser. Inputs are
//! registered as `(C, H, W)` with NCHW input order; the parser translates
//! from the layout the network was trained in.

use std::ffi::{c_void, CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;
use tracing::debug;

use super::backend::{Backend, Binding, CompiledPlan, DeviceBuffer, ExecutionContext, ModelParser};
use super::ffi;
use crate::error::{Result, RunnerError};
use crate::logging::{LogSink, Severity, TracingSink};
use crate::shape::{ScalarType, TensorShape};

const MAX_DIMS: usize = 8;

/// Get the last error message from the C++ bridge.
fn get_last_error() -> String {
    unsafe {
        let err_ptr = ffi::trt_get_last_error();
        if err_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(err_ptr).to_string_lossy().into_owned()
        }
    }
}

extern "C" fn forward_log(severity: c_int, message: *const c_char, _user: *mut c_void) {
    if message.is_null() {
        return;
    }
    // SAFETY: the bridge passes a NUL-terminated string valid for this call.
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    TracingSink.log(Severity::from_code(severity), &message);
}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| RunnerError::config(format!("Invalid tensor name: {:?}", s)))
}

fn to_c_int(value: usize, what: &str) -> Result<c_int> {
    c_int::try_from(value).map_err(|_| RunnerError::config(format!("{} {} out of range", what, value)))
}

/// UFF parser handle.
pub struct TrtParser {
    handle: ffi::ParserHandle,
}

impl Drop for TrtParser {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { ffi::trt_parser_free(self.handle) };
        }
    }
}

impl ModelParser for TrtParser {
    type Network = TrtNetwork;

    fn register_input(&mut self, name: &str, shape: &TensorShape) -> Result<()> {
        let [c, h, w] = shape.dims() else {
            return Err(RunnerError::shape(format!(
                "UFF inputs must be (C, H, W), got {}",
                shape
            )));
        };
        let name_c = c_string(name)?;
        let ok = unsafe {
            ffi::trt_parser_register_input(
                self.handle,
                name_c.as_ptr(),
                to_c_int(*c, "channels")?,
                to_c_int(*h, "height")?,
                to_c_int(*w, "width")?,
            )
        };
        if ok == 0 {
            return Err(RunnerError::config(format!(
                "Failed to register input {}: {}",
                name,
                get_last_error()
            )));
        }
        Ok(())
    }

    fn register_output(&mut self, name: &str) -> Result<()> {
        let name_c = c_string(name)?;
        let ok = unsafe { ffi::trt_parser_register_output(self.handle, name_c.as_ptr()) };
        if ok == 0 {
            return Err(RunnerError::config(format!(
                "Failed to register output {}: {}",
                name,
                get_last_error()
            )));
        }
        Ok(())
    }

    fn parse(&mut self, model: &Path, precision: ScalarType) -> Result<TrtNetwork> {
        let path_c = CString::new(model.to_string_lossy().as_ref())
            .map_err(|_| RunnerError::config("Invalid path encoding"))?;
        let handle = unsafe { ffi::trt_parser_parse(self.handle, path_c.as_ptr(), precision.code()) };
        if handle.is_null() {
            Err(RunnerError::config(format!(
                "UFF parser rejected {}: {}",
                model.display(),
                get_last_error()
            )))
        } else {
            Ok(TrtNetwork { handle })
        }
    }
}

/// Parsed network together with the builder that owns it.
pub struct TrtNetwork {
    handle: ffi::NetworkHandle,
}

impl Drop for TrtNetwork {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { ffi::trt_network_free(self.handle) };
        }
    }
}

/// CUDA engine plus the bindings it declares.
pub struct TrtPlan {
    engine: ffi::EngineHandle,
    bindings: Vec<Binding>,
    max_batch_size: usize,
}

// SAFETY: the engine is only touched through &self / &mut self of its owner.
unsafe impl Send for TrtPlan {}

impl TrtPlan {
    /// Read the engine's binding table.
    ///
    /// # Safety
    ///
    /// `engine` must be a live engine handle from the bridge.
    unsafe fn read_bindings(engine: ffi::EngineHandle) -> Result<Vec<Binding>> {
        let count = ffi::trt_engine_num_bindings(engine).max(0) as usize;
        let mut bindings = Vec::with_capacity(count);
        for index in 0..count {
            let i = index as c_int;
            let name_ptr = ffi::trt_engine_binding_name(engine, i);
            if name_ptr.is_null() {
                return Err(RunnerError::device(format!("binding {} has no name", index)));
            }
            let name = CStr::from_ptr(name_ptr).to_string_lossy().into_owned();

            let mut dims: [c_int; MAX_DIMS] = [0; MAX_DIMS];
            let rank = ffi::trt_engine_binding_dims(engine, i, dims.as_mut_ptr(), MAX_DIMS as c_int);
            let rank = (rank.max(0) as usize).min(MAX_DIMS);
            let extents: Vec<usize> = dims[..rank].iter().map(|&d| d.max(0) as usize).collect();

            bindings.push(Binding {
                index,
                name,
                scalar_type: ScalarType::from_code(ffi::trt_engine_binding_dtype(engine, i)),
                shape: TensorShape::new(extents)?,
                is_input: ffi::trt_engine_binding_is_input(engine, i) != 0,
            });
        }
        Ok(bindings)
    }
}

impl Drop for TrtPlan {
    fn drop(&mut self) {
        if !self.engine.is_null() {
            unsafe { ffi::trt_engine_free(self.engine) };
        }
    }
}

impl CompiledPlan for TrtPlan {
    type Buffer = TrtBuffer;
    type Context<'a> = TrtContext<'a>;

    fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn create_execution_context(&self) -> Result<TrtContext<'_>> {
        let handle = unsafe { ffi::trt_context_create(self.engine) };
        if handle.is_null() {
            Err(RunnerError::device(format!(
                "Failed to create execution context: {}",
                get_last_error()
            )))
        } else {
            Ok(TrtContext {
                handle,
                _plan: PhantomData,
            })
        }
    }
}

/// Execution context borrowed from a [`TrtPlan`].
pub struct TrtContext<'a> {
    handle: ffi::ContextHandle,
    _plan: PhantomData<&'a TrtPlan>,
}

impl ExecutionContext for TrtContext<'_> {
    type Buffer = TrtBuffer;

    fn execute(&mut self, batch_size: usize, buffers: &mut [TrtBuffer]) -> Result<()> {
        let mut pointers: Vec<*mut c_void> = buffers.iter().map(|b| b.ptr).collect();
        let batch = to_c_int(batch_size, "batch size")?;
        let ok = unsafe { ffi::trt_context_execute(self.handle, batch, pointers.as_mut_ptr()) };
        if ok == 0 {
            return Err(RunnerError::device(format!(
                "Execution failed: {}",
                get_last_error()
            )));
        }
        Ok(())
    }
}

impl Drop for TrtContext<'_> {
    fn drop(&mut self) {
        unsafe { ffi::trt_context_free(self.handle) };
    }
}

/// CUDA device allocation.
pub struct TrtBuffer {
    ptr: *mut c_void,
    len: usize,
}

// SAFETY: device pointers are plain addresses; access is serialized by the owner.
unsafe impl Send for TrtBuffer {}

impl DeviceBuffer for TrtBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_from_host(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.len {
            return Err(RunnerError::device(format!(
                "copy of {} bytes into a {} byte buffer",
                src.len(),
                self.len
            )));
        }
        let ok = unsafe { ffi::trt_memcpy_htod(self.ptr, src.as_ptr().cast(), src.len()) };
        if ok == 0 {
            return Err(RunnerError::device(format!(
                "Host to device copy failed: {}",
                get_last_error()
            )));
        }
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.len {
            return Err(RunnerError::device(format!(
                "copy of {} bytes out of a {} byte buffer",
                dst.len(),
                self.len
            )));
        }
        let ok = unsafe { ffi::trt_memcpy_dtoh(dst.as_mut_ptr().cast(), self.ptr, dst.len()) };
        if ok == 0 {
            return Err(RunnerError::device(format!(
                "Device to host copy failed: {}",
                get_last_error()
            )));
        }
        Ok(())
    }
}

impl Drop for TrtBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::trt_device_free(self.ptr) };
        }
    }
}

/// TensorRT backend.
///
/// Creating one routes the bridge's diagnostics into `tracing`. The bridge
/// logger is process-wide, so this happens once per process in practice.
#[derive(Debug, Clone, Copy)]
pub struct TensorRtBackend;

impl TensorRtBackend {
    pub fn new() -> Self {
        unsafe { ffi::trt_set_log_callback(Some(forward_log), ptr::null_mut()) };
        Self
    }
}

impl Default for TensorRtBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for TensorRtBackend {
    type Parser = TrtParser;
    type Buffer = TrtBuffer;
    type Plan = TrtPlan;

    fn name(&self) -> &'static str {
        "tensorrt"
    }

    fn create_parser(&self) -> Result<TrtParser> {
        let handle = unsafe { ffi::trt_parser_create() };
        if handle.is_null() {
            Err(RunnerError::config(format!(
                "Failed to create UFF parser: {}",
                get_last_error()
            )))
        } else {
            Ok(TrtParser { handle })
        }
    }

    fn build_plan(&self, network: TrtNetwork, max_batch_size: usize) -> Result<Option<TrtPlan>> {
        let batch = to_c_int(max_batch_size, "max batch size")?;
        let engine = unsafe { ffi::trt_network_build(network.handle, batch) };
        drop(network);
        if engine.is_null() {
            debug!("builder returned no engine: {}", get_last_error());
            return Ok(None);
        }
        // Wrap first so the engine is freed if the binding table is unreadable.
        let mut plan = TrtPlan {
            engine,
            bindings: Vec::new(),
            max_batch_size,
        };
        plan.bindings = unsafe { TrtPlan::read_bindings(engine)? };
        Ok(Some(plan))
    }

    fn allocate(&self, bytes: usize) -> Result<TrtBuffer> {
        let ptr = unsafe { ffi::trt_device_alloc(bytes) };
        if ptr.is_null() {
            return Err(RunnerError::device(format!(
                "Failed to allocate {} bytes: {}",
                bytes,
                get_last_error()
            )));
        }
        Ok(TrtBuffer { ptr, len: bytes })
    }

    fn release_parser_resources(&self) {
        unsafe { ffi::trt_shutdown_parser_library() };
    }
}
