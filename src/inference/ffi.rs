//! FFI declarations for the C++ TensorRT bridge.
//!
//! This module contains the raw FFI bindings. Use the safe wrappers
//! in the `tensorrt` module instead of calling these directly.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

/// Opaque handle to a UFF parser.
pub type ParserHandle = *mut c_void;

/// Opaque handle to a parsed network and the builder that owns it.
pub type NetworkHandle = *mut c_void;

/// Opaque handle to a CUDA engine.
pub type EngineHandle = *mut c_void;

/// Opaque handle to an execution context.
pub type ContextHandle = *mut c_void;

/// Diagnostic callback: severity code, message, user data.
pub type LogCallback = extern "C" fn(c_int, *const c_char, *mut c_void);

extern "C" {
    pub fn trt_get_last_error() -> *const c_char;
    pub fn trt_set_log_callback(callback: Option<LogCallback>, user: *mut c_void);

    // Parser
    pub fn trt_parser_create() -> ParserHandle;
    pub fn trt_parser_free(parser: ParserHandle);
    pub fn trt_parser_register_input(
        parser: ParserHandle,
        name: *const c_char,
        channels: c_int,
        height: c_int,
        width: c_int,
    ) -> c_int;
    pub fn trt_parser_register_output(parser: ParserHandle, name: *const c_char) -> c_int;
    pub fn trt_parser_parse(
        parser: ParserHandle,
        path: *const c_char,
        dtype: c_int,
    ) -> NetworkHandle;
    pub fn trt_shutdown_parser_library();

    // Builder
    pub fn trt_network_free(network: NetworkHandle);
    pub fn trt_network_build(network: NetworkHandle, max_batch_size: c_int) -> EngineHandle;

    // Engine
    pub fn trt_engine_free(engine: EngineHandle);
    pub fn trt_engine_num_bindings(engine: EngineHandle) -> c_int;
    pub fn trt_engine_binding_name(engine: EngineHandle, index: c_int) -> *const c_char;
    pub fn trt_engine_binding_dtype(engine: EngineHandle, index: c_int) -> c_int;
    pub fn trt_engine_binding_is_input(engine: EngineHandle, index: c_int) -> c_int;
    /// Writes up to `capacity` extents into `dims`, returns the rank.
    pub fn trt_engine_binding_dims(
        engine: EngineHandle,
        index: c_int,
        dims: *mut c_int,
        capacity: c_int,
    ) -> c_int;

    // Execution
    pub fn trt_context_create(engine: EngineHandle) -> ContextHandle;
    pub fn trt_context_free(context: ContextHandle);
    pub fn trt_context_execute(
        context: ContextHandle,
        batch_size: c_int,
        bindings: *mut *mut c_void,
    ) -> c_int;

    // Device memory
    pub fn trt_device_alloc(bytes: usize) -> *mut c_void;
    pub fn trt_device_free(ptr: *mut c_void);
    pub fn trt_memcpy_htod(dst: *mut c_void, src: *const c_void, bytes: usize) -> c_int;
    pub fn trt_memcpy_dtoh(dst: *mut c_void, src: *const c_void, bytes: usize) -> c_int;
}
