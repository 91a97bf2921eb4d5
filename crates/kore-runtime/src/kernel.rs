//! Kernel handles and positional argument binding.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::RuntimeError;
use crate::program::Program;
use crate::runtime::{DevicePtr, LaunchDims, RawKernel};

/// Ceiling on the product of local work sizes. Larger requests are reset to
/// zero so the runtime picks the shape.
// TODO: query the per-device work-group limit instead of a fixed value.
pub const MAX_LOCAL_WORK_SIZE: usize = 256;

/// A kernel entry point in a built [`Program`] plus its launch geometry.
pub struct Kernel {
    program: Arc<Program>,
    raw: RawKernel,
    name: String,
    dims: LaunchDims,
    launch_lock: Mutex<()>,
}

impl Kernel {
    /// Create `name` from `program`.
    ///
    /// # Panics
    /// If `local` and `global` differ in rank or the rank is not 1–3.
    pub fn new(
        program: Arc<Program>,
        name: &str,
        local: &[usize],
        global: &[usize],
    ) -> Result<Self, RuntimeError> {
        assert!(
            !global.is_empty() && global.len() <= 3,
            "kernel '{name}': global work size rank must be 1-3, got {}",
            global.len()
        );
        assert_eq!(
            local.len(),
            global.len(),
            "kernel '{name}': local/global work size rank mismatch"
        );

        let dims = clamp_local(LaunchDims {
            local: SmallVec::from_slice(local),
            global: SmallVec::from_slice(global),
        });
        if dims.auto_local() && local.iter().any(|&d| d != 0) {
            tracing::debug!(
                "kernel '{}': local size {:?} exceeds {}, deferring to runtime",
                name,
                local,
                MAX_LOCAL_WORK_SIZE
            );
        }

        let raw = program.runtime().create_kernel(program.raw(), name)?;
        Ok(Self {
            program,
            raw,
            name: name.to_string(),
            dims,
            launch_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_dims(&self) -> &[usize] {
        &self.dims.local
    }

    pub fn global_dims(&self) -> &[usize] {
        &self.dims.global
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn raw(&self) -> RawKernel {
        self.raw
    }

    pub fn invoke(&self) -> KernelInvoke<'_> {
        KernelInvoke {
            kernel: self,
            callback: None,
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("local", &self.dims.local)
            .field("global", &self.dims.global)
            .field("program", &self.program.name())
            .finish()
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.program.runtime().release_kernel(self.raw);
    }
}

fn clamp_local(mut dims: LaunchDims) -> LaunchDims {
    let product = dims
        .local
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d));
    if product.map_or(true, |p| p > MAX_LOCAL_WORK_SIZE) {
        dims.local.iter_mut().for_each(|d| *d = 0);
    }
    dims
}

/// Marks a kernel slot as local/shared memory of the given byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMemArg(pub usize);

impl LocalMemArg {
    pub fn size(&self) -> usize {
        self.0
    }
}

/// One positional kernel argument.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    /// A scalar or device pointer, bound by value.
    Value(SmallVec<[u8; 8]>),
    /// A local memory slot; only its size is bound.
    Local(usize),
}

impl KernelArg {
    pub fn size(&self) -> usize {
        match self {
            KernelArg::Value(bytes) => bytes.len(),
            KernelArg::Local(size) => *size,
        }
    }
}

macro_rules! impl_value_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KernelArg {
                fn from(value: $ty) -> Self {
                    KernelArg::Value(SmallVec::from_slice(&value.to_ne_bytes()))
                }
            }
        )*
    };
}

impl_value_arg!(f32, f64, i32, u32, i64, u64, usize);

impl From<DevicePtr> for KernelArg {
    fn from(ptr: DevicePtr) -> Self {
        KernelArg::from(ptr.0)
    }
}

impl From<LocalMemArg> for KernelArg {
    fn from(lmem: LocalMemArg) -> Self {
        KernelArg::Local(lmem.size())
    }
}

/// Build a `Vec<KernelArg>` from heterogeneous values.
///
/// ```
/// use kore_runtime::{kernel_args, DevicePtr, LocalMemArg};
/// let args = kernel_args![DevicePtr(0x1000), 0u32, 1.0f32, LocalMemArg(256)];
/// assert_eq!(args.len(), 4);
/// ```
#[macro_export]
macro_rules! kernel_args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::KernelArg::from($arg)),*]
    };
}

/// What a launch callback sees after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: String,
    pub local: SmallVec<[usize; 3]>,
    pub global: SmallVec<[usize; 3]>,
    pub num_args: usize,
}

type LaunchCallback<'a> = Box<dyn FnOnce(&LaunchRecord) + 'a>;

/// A pending launch of one kernel.
pub struct KernelInvoke<'k> {
    kernel: &'k Kernel,
    callback: Option<LaunchCallback<'k>>,
}

impl<'k> KernelInvoke<'k> {
    /// Run `callback` once the launch has been submitted.
    pub fn with_callback(mut self, callback: impl FnOnce(&LaunchRecord) + 'k) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Bind `args` to slots `0..args.len()` and submit the kernel.
    ///
    /// Binding stops at the first slot the runtime rejects.
    pub fn call(self, args: &[KernelArg]) -> Result<(), RuntimeError> {
        let kernel = self.kernel;
        let runtime = kernel.program.runtime();

        let _launch = kernel.launch_lock.lock();
        for (index, arg) in args.iter().enumerate() {
            let index = index as u32;
            let bound = match arg {
                KernelArg::Value(bytes) => {
                    runtime.set_kernel_arg(kernel.raw, index, bytes.len(), Some(bytes.as_slice()))
                }
                KernelArg::Local(size) => runtime.set_kernel_arg(kernel.raw, index, *size, None),
            };
            bound.map_err(|status| RuntimeError::ArgumentBinding {
                index,
                size: arg.size(),
                status,
            })?;
        }
        runtime.enqueue_kernel(kernel.raw, &kernel.dims)?;

        tracing::trace!("launched {} with {} args", kernel.name, args.len());
        if let Some(callback) = self.callback {
            callback(&LaunchRecord {
                kernel: kernel.name.clone(),
                local: kernel.dims.local.clone(),
                global: kernel.dims.global.clone(),
                num_args: args.len(),
            });
        }
        Ok(())
    }
}
