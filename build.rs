//! Build script for uff-runner.
//!
//! Without the `tensorrt` feature there is nothing to build: the crate only
//! ships the host backend. With it, this script builds the C++ TensorRT
//! bridge in `trt_bridge/` with CMake and links it to the crate.
//!
//! # Environment Variables
//!
//! - `TENSORRT_ROOT`: Path to the TensorRT installation (optional, common
//!   prefixes are searched otherwise)
//! - `CUDA_HOME` / `CUDA_PATH`: Path to the CUDA toolkit (optional)
//! - `TRT_BRIDGE_SKIP_BUILD`: Set to "1" to skip building (for development)

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if env::var_os("CARGO_FEATURE_TENSORRT").is_none() {
        return;
    }
    build_trt_bridge();
}

/// Locate TensorRT: `TENSORRT_ROOT` first, then the usual install prefixes.
fn find_tensorrt() -> Option<PathBuf> {
    if let Ok(path) = env::var("TENSORRT_ROOT") {
        return Some(PathBuf::from(path));
    }
    ["/usr/local/tensorrt", "/opt/tensorrt", "/usr"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join("include/NvInfer.h").exists())
}

fn find_cuda() -> Option<PathBuf> {
    env::var("CUDA_HOME")
        .or_else(|_| env::var("CUDA_PATH"))
        .map(PathBuf::from)
        .ok()
        .or_else(|| {
            ["/usr/local/cuda", "/opt/cuda"]
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        })
}

fn build_trt_bridge() {
    // Check if we should skip the build
    if env::var("TRT_BRIDGE_SKIP_BUILD")
        .map(|v| v == "1")
        .unwrap_or(false)
    {
        println!("cargo:warning=Skipping trt-bridge build (TRT_BRIDGE_SKIP_BUILD=1)");
        return;
    }

    let tensorrt = find_tensorrt().unwrap_or_else(|| {
        panic!(
            "Could not find TensorRT installation.\n\
             Checked: TENSORRT_ROOT, /usr/local/tensorrt, /opt/tensorrt, /usr\n\
             \n\
             Set TENSORRT_ROOT to your TensorRT installation or build without\n\
             the `tensorrt` feature to use the host backend only."
        )
    });

    // Rerun if bridge sources change
    println!("cargo:rerun-if-changed=trt_bridge/src/trt_bridge.cpp");
    println!("cargo:rerun-if-changed=trt_bridge/include/trt_bridge.h");
    println!("cargo:rerun-if-changed=trt_bridge/CMakeLists.txt");
    println!("cargo:rerun-if-env-changed=TENSORRT_ROOT");
    println!("cargo:rerun-if-env-changed=CUDA_HOME");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");
    println!("cargo:rerun-if-env-changed=TRT_BRIDGE_SKIP_BUILD");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let bridge_dir = manifest_dir.join("trt_bridge");

    // Build with CMake
    let mut cmake_config = cmake::Config::new(&bridge_dir);
    cmake_config.define("TENSORRT_ROOT", &tensorrt);
    if let Some(cuda) = find_cuda() {
        cmake_config.define("CUDAToolkit_ROOT", &cuda);
    }

    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let build_type = if profile == "release" {
        "Release"
    } else {
        "Debug"
    };
    cmake_config.define("CMAKE_BUILD_TYPE", build_type);

    let dst = cmake_config.build();

    // Link the bridge library; it resolves TensorRT and CUDA through its own rpath.
    println!("cargo:rustc-link-search=native={}/lib", dst.display());
    println!("cargo:rustc-link-lib=dylib=trt_bridge");

    // Use RPATH (not RUNPATH) for reliable library discovery
    println!("cargo:rustc-link-arg=-Wl,--disable-new-dtags");
    println!("cargo:rustc-link-arg=-Wl,-rpath,{}/lib", dst.display());
    for lib_dir in ["lib", "lib64"] {
        let dir = tensorrt.join(lib_dir);
        if dir.exists() {
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", dir.display());
        }
    }
}
