//! HIP device selection.

use std::ffi::{c_char, CStr};
use std::sync::OnceLock;

use parking_lot::Mutex;

use super::ffi::{self, check_hip, HIP_SUCCESS};
use crate::error::RuntimeError;

static INIT_DEVICES: OnceLock<Mutex<Vec<bool>>> = OnceLock::new();

fn init_devices() -> &'static Mutex<Vec<bool>> {
    INIT_DEVICES.get_or_init(|| Mutex::new(Vec::new()))
}

/// Initialize HIP and select `device_idx`. No-op after the first call per device.
pub fn init_device(device_idx: usize) -> Result<(), RuntimeError> {
    let api = ffi::require_hip()?;
    let mut devs = init_devices().lock();
    if devs.len() <= device_idx {
        devs.resize(device_idx + 1, false);
    }
    if !devs[device_idx] {
        check_hip(unsafe { (api.hip_init)(0) }, "hipInit")?;
        check_hip(
            unsafe { (api.hip_set_device)(device_idx as i32) },
            "hipSetDevice",
        )?;
        devs[device_idx] = true;
    }
    Ok(())
}

pub fn set_device(device_idx: usize) -> Result<(), RuntimeError> {
    let api = ffi::require_hip()?;
    check_hip(
        unsafe { (api.hip_set_device)(device_idx as i32) },
        "hipSetDevice",
    )
}

/// Number of visible HIP devices; zero when HIP is not installed.
pub fn device_count() -> usize {
    let Some(api) = ffi::hip_api() else {
        return 0;
    };
    if unsafe { (api.hip_init)(0) } != HIP_SUCCESS {
        return 0;
    }
    let mut count: i32 = 0;
    if unsafe { (api.hip_get_device_count)(&mut count) } != HIP_SUCCESS {
        return 0;
    }
    count.max(0) as usize
}

pub fn is_rocm_available() -> bool {
    device_count() > 0
}

/// Name the driver reports for `device_idx`.
pub fn device_name(device_idx: usize) -> Result<String, RuntimeError> {
    let api = ffi::require_hip()?;
    let mut buf = [0 as c_char; 256];
    check_hip(
        unsafe { (api.hip_device_get_name)(buf.as_mut_ptr(), buf.len() as i32, device_idx as i32) },
        "hipDeviceGetName",
    )?;
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().trim().to_string())
}

/// Wait for all queued work on the current device.
pub fn device_synchronize() -> Result<(), RuntimeError> {
    let api = ffi::require_hip()?;
    check_hip(unsafe { (api.hip_device_synchronize)() }, "hipDeviceSynchronize")
}
