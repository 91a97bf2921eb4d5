//! # kore-runtime
//!
//! Kernel program loading, caching and launch for Kore GPU primitives.
//!
//! - [`ProgramLoader`]: turns a named file or inline text into a built
//!   [`Program`] (source, assembly or prebuilt binary)
//! - [`Kernel`]: an entry point plus its launch geometry, invoked with
//!   positional [`KernelArg`]s
//! - [`Handle`]: per-session runtime, source lookup and kernel cache
//!
//! Concrete runtimes plug in through [`DeviceRuntime`]. The `rocm` feature
//! provides a HIP implementation; the `testing` feature provides
//! [`testing::RecordingRuntime`] for tests without a GPU.

pub mod assembler;
pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod kernel;
pub mod program;
pub mod runtime;
pub mod sources;

#[cfg(feature = "rocm")]
pub mod hip;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assembler::{Assembler, ExternalAssembler, NoAssembler};
pub use cache::KernelCache;
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use handle::{Handle, KernelSpec};
pub use kernel::{Kernel, KernelArg, KernelInvoke, LaunchRecord, LocalMemArg, MAX_LOCAL_WORK_SIZE};
pub use program::{KernelSource, Program, ProgramKind, ProgramLoader};
pub use runtime::{DevicePtr, DeviceRuntime, LaunchDims, RawKernel, RawModule};
pub use sources::{DirectorySources, EmbeddedKernels, KernelSources};

pub type Result<T> = std::result::Result<T, RuntimeError>;
