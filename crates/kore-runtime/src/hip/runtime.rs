//! [`DeviceRuntime`] over HIP modules and hiprtc.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_uint, c_void, CString};

use parking_lot::Mutex;

use super::context::{self, init_device, set_device};
use super::ffi::{self, check_hip, check_hiprtc, HipFunction, HipModule, HIPRTC_SUCCESS};
use crate::error::RuntimeError;
use crate::kernel::MAX_LOCAL_WORK_SIZE;
use crate::runtime::{DeviceRuntime, LaunchDims, RawKernel, RawModule};

const HIP_PRELUDE: &str = r#"
#ifndef __HIP_PLATFORM_AMD__
#define __HIP_PLATFORM_AMD__
#endif
#include <hip/hip_runtime.h>
"#;

#[derive(Debug)]
enum BoundArg {
    Value(Vec<u8>),
    Shared(usize),
}

struct HipKernel {
    func: HipFunction,
    args: BTreeMap<u32, BoundArg>,
}

// Function handles stay valid while their module is loaded; `Program`
// outlives every `Kernel` created from it.
unsafe impl Send for HipKernel {}

#[derive(Default)]
struct Kernels {
    next: usize,
    live: HashMap<usize, HipKernel>,
}

impl Kernels {
    fn insert(&mut self, func: HipFunction) -> usize {
        self.next += 1;
        let id = self.next;
        self.live.insert(
            id,
            HipKernel {
                func,
                args: BTreeMap::new(),
            },
        );
        id
    }

    /// Slot 0 starts a new argument list; slots left over from a longer
    /// earlier call are dropped.
    fn bind(&mut self, id: usize, index: u32, arg: BoundArg) -> Result<(), i32> {
        // hipErrorInvalidResourceHandle
        let entry = self.live.get_mut(&id).ok_or(400)?;
        if index == 0 {
            entry.args.clear();
        }
        entry.args.insert(index, arg);
        Ok(())
    }

    /// Drain the bound arguments for one launch: value slots in index
    /// order plus the summed dynamic shared memory.
    fn take_args(&mut self, id: usize) -> Option<(HipFunction, Vec<Vec<u8>>, usize)> {
        let entry = self.live.get_mut(&id)?;
        let mut values = Vec::with_capacity(entry.args.len());
        let mut shared_mem_bytes = 0usize;
        for arg in std::mem::take(&mut entry.args).into_values() {
            match arg {
                BoundArg::Value(bytes) => values.push(bytes),
                BoundArg::Shared(size) => shared_mem_bytes += size,
            }
        }
        Some((entry.func, values, shared_mem_bytes))
    }
}

/// HIP device runtime for one device index.
pub struct HipRuntime {
    device_idx: usize,
    arch: Option<String>,
    kernels: Mutex<Kernels>,
}

impl HipRuntime {
    /// Initialize `device_idx`. Fails with [`RuntimeError::NotAvailable`]
    /// when HIP is not installed.
    pub fn new(device_idx: i32) -> Result<Self, RuntimeError> {
        let device_idx = usize::try_from(device_idx)
            .map_err(|_| RuntimeError::NotAvailable(format!("invalid HIP device {device_idx}")))?;
        init_device(device_idx)?;
        let arch = std::env::var("KORE_DEVICE_ARCH")
            .ok()
            .filter(|v| !v.trim().is_empty());
        Ok(Self {
            device_idx,
            arch,
            kernels: Mutex::new(Kernels::default()),
        })
    }

    /// Override the target name handed to the assembler (e.g. `gfx906`).
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn device_idx(&self) -> usize {
        self.device_idx
    }

    fn load_module(&self, code: &[u8]) -> Result<RawModule, RuntimeError> {
        let hip = ffi::require_hip()?;
        set_device(self.device_idx)?;
        let mut module: HipModule = std::ptr::null_mut();
        check_hip(
            unsafe { (hip.hip_module_load_data)(&mut module, code.as_ptr() as *const c_void) },
            "hipModuleLoadData",
        )?;
        Ok(RawModule(module as usize))
    }
}

/// Block and grid shapes for `hipModuleLaunchKernel`, padded to 3-D.
fn launch_shape(dims: &LaunchDims) -> ([u32; 3], [u32; 3]) {
    let mut block = [1u32; 3];
    let mut grid = [1u32; 3];
    for (i, &global) in dims.global.iter().enumerate() {
        let local = if dims.auto_local() {
            if i == 0 {
                global.clamp(1, MAX_LOCAL_WORK_SIZE)
            } else {
                1
            }
        } else {
            dims.local[i].max(1)
        };
        block[i] = local as u32;
        grid[i] = global.div_ceil(local).max(1) as u32;
    }
    (grid, block)
}

fn compile_log(hiprtc: &ffi::HiprtcApi, prog: ffi::HiprtcProgram) -> String {
    let mut log_size: usize = 0;
    let _ = unsafe { (hiprtc.hiprtc_get_program_log_size)(prog, &mut log_size) };
    let mut log_buf = vec![0u8; log_size];
    let _ = unsafe { (hiprtc.hiprtc_get_program_log)(prog, log_buf.as_mut_ptr() as *mut c_char) };
    String::from_utf8_lossy(&log_buf)
        .trim_end_matches('\0')
        .to_string()
}

impl DeviceRuntime for HipRuntime {
    fn backend_name(&self) -> &str {
        "hip"
    }

    fn device_name(&self) -> Result<String, RuntimeError> {
        match &self.arch {
            Some(arch) => Ok(arch.clone()),
            None => context::device_name(self.device_idx),
        }
    }

    fn source_standard_flag(&self) -> &str {
        "-std=c++17"
    }

    fn build_program_from_source(
        &self,
        source: &[u8],
        options: &str,
    ) -> Result<RawModule, RuntimeError> {
        let hiprtc = ffi::require_hiprtc()?;

        let mut full_source = HIP_PRELUDE.as_bytes().to_vec();
        full_source.extend_from_slice(source);
        let c_source = CString::new(full_source)
            .map_err(|_| RuntimeError::build(-1, "source contains null byte"))?;
        let c_name = CString::new("kore_program").map_err(|_| RuntimeError::build(-1, "bad name"))?;
        let c_options = options
            .split_whitespace()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| RuntimeError::build(-1, "build option contains null byte"))?;
        let option_ptrs: Vec<*const c_char> = c_options.iter().map(|o| o.as_ptr()).collect();

        let mut prog: ffi::HiprtcProgram = std::ptr::null_mut();
        check_hiprtc(
            unsafe {
                (hiprtc.hiprtc_create_program)(
                    &mut prog,
                    c_source.as_ptr(),
                    c_name.as_ptr(),
                    0,
                    std::ptr::null(),
                    std::ptr::null(),
                )
            },
            "hiprtcCreateProgram",
        )?;

        let status = unsafe {
            (hiprtc.hiprtc_compile_program)(prog, option_ptrs.len() as i32, option_ptrs.as_ptr())
        };
        if status != HIPRTC_SUCCESS {
            let log = compile_log(hiprtc, prog);
            unsafe { (hiprtc.hiprtc_destroy_program)(&mut prog) };
            return Err(RuntimeError::build(status, log));
        }

        let mut code_size: usize = 0;
        let mut code = Vec::new();
        let fetched = check_hiprtc(
            unsafe { (hiprtc.hiprtc_get_code_size)(prog, &mut code_size) },
            "hiprtcGetCodeSize",
        )
        .and_then(|()| {
            code.resize(code_size, 0u8);
            check_hiprtc(
                unsafe { (hiprtc.hiprtc_get_code)(prog, code.as_mut_ptr() as *mut c_char) },
                "hiprtcGetCode",
            )
        });
        unsafe { (hiprtc.hiprtc_destroy_program)(&mut prog) };
        fetched?;

        self.load_module(&code)
    }

    fn build_program_from_binary(&self, binary: &[u8]) -> Result<RawModule, RuntimeError> {
        self.load_module(binary)
    }

    fn release_program(&self, module: RawModule) {
        if let Some(hip) = ffi::hip_api() {
            let status = unsafe { (hip.hip_module_unload)(module.0 as HipModule) };
            if status != ffi::HIP_SUCCESS {
                tracing::warn!("hipModuleUnload failed with {}", status);
            }
        }
    }

    fn create_kernel(&self, module: RawModule, name: &str) -> Result<RawKernel, RuntimeError> {
        let hip = ffi::require_hip()?;
        let c_name = CString::new(name)
            .map_err(|_| RuntimeError::runtime(-1, format!("kernel name '{name}' contains null byte")))?;
        let mut func: HipFunction = std::ptr::null_mut();
        check_hip(
            unsafe { (hip.hip_module_get_function)(&mut func, module.0 as HipModule, c_name.as_ptr()) },
            &format!("hipModuleGetFunction({name})"),
        )?;

        let id = self.kernels.lock().insert(func);
        Ok(RawKernel(id))
    }

    fn release_kernel(&self, kernel: RawKernel) {
        self.kernels.lock().live.remove(&kernel.0);
    }

    fn set_kernel_arg(
        &self,
        kernel: RawKernel,
        index: u32,
        size: usize,
        value: Option<&[u8]>,
    ) -> Result<(), i32> {
        let arg = match value {
            Some(bytes) => BoundArg::Value(bytes.to_vec()),
            None => BoundArg::Shared(size),
        };
        self.kernels.lock().bind(kernel.0, index, arg)
    }

    fn enqueue_kernel(&self, kernel: RawKernel, dims: &LaunchDims) -> Result<(), RuntimeError> {
        let hip = ffi::require_hip()?;
        set_device(self.device_idx)?;

        let (func, mut values, shared_mem_bytes) = self
            .kernels
            .lock()
            .take_args(kernel.0)
            .ok_or_else(|| RuntimeError::runtime(400, "enqueue of released kernel"))?;
        let mut params: Vec<*mut c_void> = values
            .iter_mut()
            .map(|bytes| bytes.as_mut_ptr() as *mut c_void)
            .collect();

        let (grid, block) = launch_shape(dims);
        check_hip(
            unsafe {
                (hip.hip_module_launch_kernel)(
                    func,
                    grid[0] as c_uint,
                    grid[1] as c_uint,
                    grid[2] as c_uint,
                    block[0] as c_uint,
                    block[1] as c_uint,
                    block[2] as c_uint,
                    shared_mem_bytes as c_uint,
                    std::ptr::null_mut(),
                    params.as_mut_ptr(),
                    std::ptr::null_mut(),
                )
            },
            "hipModuleLaunchKernel",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_launch_shape_explicit_local() {
        let dims = LaunchDims {
            local: smallvec![64, 1, 1],
            global: smallvec![1000, 1, 1],
        };
        let (grid, block) = launch_shape(&dims);
        assert_eq!(block, [64, 1, 1]);
        assert_eq!(grid, [16, 1, 1]);
    }

    #[test]
    fn test_launch_shape_auto_local() {
        let dims = LaunchDims {
            local: smallvec![0, 0],
            global: smallvec![4096, 8],
        };
        let (grid, block) = launch_shape(&dims);
        assert_eq!(block, [256, 1, 1]);
        assert_eq!(grid, [16, 8, 1]);
    }

    fn bound(kernels: &mut Kernels, id: usize, args: Vec<BoundArg>) {
        for (index, arg) in args.into_iter().enumerate() {
            kernels.bind(id, index as u32, arg).unwrap();
        }
    }

    #[test]
    fn test_take_args_orders_values_and_sums_shared() {
        let mut kernels = Kernels::default();
        let id = kernels.insert(std::ptr::null_mut());
        bound(
            &mut kernels,
            id,
            vec![
                BoundArg::Value(vec![1, 2, 3, 4]),
                BoundArg::Shared(512),
                BoundArg::Value(vec![5]),
                BoundArg::Shared(256),
            ],
        );
        let (_, values, shared) = kernels.take_args(id).unwrap();
        assert_eq!(values, vec![vec![1, 2, 3, 4], vec![5]]);
        assert_eq!(shared, 768);
    }

    #[test]
    fn test_shorter_call_drops_stale_slots() {
        let mut kernels = Kernels::default();
        let id = kernels.insert(std::ptr::null_mut());
        bound(
            &mut kernels,
            id,
            vec![BoundArg::Value(vec![1]), BoundArg::Shared(1024)],
        );
        kernels.take_args(id).unwrap();

        bound(&mut kernels, id, vec![BoundArg::Value(vec![2])]);
        let (_, values, shared) = kernels.take_args(id).unwrap();
        assert_eq!(values, vec![vec![2]]);
        assert_eq!(shared, 0);
    }

    #[test]
    fn test_failed_call_leftovers_reset_by_next_call() {
        let mut kernels = Kernels::default();
        let id = kernels.insert(std::ptr::null_mut());
        // A call that bound two slots and then failed before enqueue.
        bound(
            &mut kernels,
            id,
            vec![BoundArg::Value(vec![1]), BoundArg::Shared(64)],
        );

        bound(&mut kernels, id, vec![BoundArg::Value(vec![9])]);
        let (_, values, shared) = kernels.take_args(id).unwrap();
        assert_eq!(values, vec![vec![9]]);
        assert_eq!(shared, 0);
    }

    #[test]
    fn test_bind_released_kernel_fails() {
        let mut kernels = Kernels::default();
        assert_eq!(kernels.bind(7, 0, BoundArg::Shared(4)), Err(400));
        assert!(kernels.take_args(7).is_none());
    }
}
