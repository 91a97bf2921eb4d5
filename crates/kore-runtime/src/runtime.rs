//! The seam between Kore and a concrete GPU runtime.
//!
//! Programs and kernels are handed around as raw opaque handles; ownership and
//! release are managed by [`crate::Program`] and [`crate::Kernel`].

use std::fmt;

use smallvec::SmallVec;

use crate::error::RuntimeError;

/// Opaque handle to a built module inside the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawModule(pub usize);

/// Opaque handle to a kernel entry point inside a built module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawKernel(pub usize);

/// Device memory address, bound to kernels as a pointer-sized scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub fn null() -> Self {
        DevicePtr(0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Per-dimension work sizes for one launch. A local size of all zeros lets the
/// runtime pick the work-group shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDims {
    pub local: SmallVec<[usize; 3]>,
    pub global: SmallVec<[usize; 3]>,
}

impl LaunchDims {
    pub fn rank(&self) -> usize {
        self.global.len()
    }

    pub fn auto_local(&self) -> bool {
        self.local.iter().all(|&d| d == 0)
    }
}

/// Operations the core needs from a GPU runtime.
///
/// `set_kernel_arg` reports failure as the runtime's raw status code; the
/// invocation layer turns it into [`RuntimeError::ArgumentBinding`].
pub trait DeviceRuntime: Send + Sync {
    /// Short backend name used in logs.
    fn backend_name(&self) -> &str;

    /// Name of the target device, as passed to the assembler (`-mcpu=`).
    fn device_name(&self) -> Result<String, RuntimeError>;

    /// Language-standard option always appended to source builds.
    fn source_standard_flag(&self) -> &str;

    fn build_program_from_source(
        &self,
        source: &[u8],
        options: &str,
    ) -> Result<RawModule, RuntimeError>;

    fn build_program_from_binary(&self, binary: &[u8]) -> Result<RawModule, RuntimeError>;

    fn release_program(&self, module: RawModule);

    fn create_kernel(&self, module: RawModule, name: &str) -> Result<RawKernel, RuntimeError>;

    fn release_kernel(&self, kernel: RawKernel);

    /// Bind slot `index`. `value` is `None` for local/shared memory slots,
    /// which carry only a size.
    fn set_kernel_arg(
        &self,
        kernel: RawKernel,
        index: u32,
        size: usize,
        value: Option<&[u8]>,
    ) -> Result<(), i32>;

    /// Submit the kernel with its currently bound arguments. Never waits for
    /// completion.
    fn enqueue_kernel(&self, kernel: RawKernel, dims: &LaunchDims) -> Result<(), RuntimeError>;
}
