//! ROCm/HIP backend.
//!
//! HIP and hiprtc are loaded at runtime with `libloading`, so enabling the
//! `rocm` feature adds no build-time ROCm dependency. Source programs are
//! compiled with hiprtc; assembled and prebuilt code objects are loaded
//! directly with `hipModuleLoadData`.

pub mod context;
pub mod ffi;
pub mod memory;
mod runtime;

pub use context::{device_count, is_rocm_available};
pub use memory::HipBuffer;
pub use runtime::HipRuntime;
