//! Device buffers for HIP launches.

use std::ffi::c_void;

use super::context::{device_synchronize, init_device, set_device};
use super::ffi::{self, check_hip, HipDeviceptr, HIP_MEMCPY_DEVICE_TO_HOST, HIP_MEMCPY_HOST_TO_DEVICE};
use crate::error::RuntimeError;
use crate::runtime::DevicePtr;

/// Raw bytes on one HIP device, freed with `hipFree` on drop.
pub struct HipBuffer {
    ptr: HipDeviceptr,
    device_idx: usize,
    nbytes: usize,
}

unsafe impl Send for HipBuffer {}
unsafe impl Sync for HipBuffer {}

impl HipBuffer {
    /// Copy `data` into a new device allocation.
    pub fn from_host(device_idx: usize, data: &[u8]) -> Result<Self, RuntimeError> {
        if data.is_empty() {
            return Ok(Self {
                ptr: std::ptr::null_mut(),
                device_idx,
                nbytes: 0,
            });
        }
        let api = ffi::require_hip()?;
        init_device(device_idx)?;
        set_device(device_idx)?;

        let nbytes = data.len();
        let mut ptr: HipDeviceptr = std::ptr::null_mut();
        check_hip(
            unsafe { (api.hip_malloc)(&mut ptr, nbytes) },
            &format!("hipMalloc({nbytes} bytes)"),
        )?;
        let buffer = Self {
            ptr,
            device_idx,
            nbytes,
        };
        check_hip(
            unsafe {
                (api.hip_memcpy)(
                    ptr,
                    data.as_ptr() as *const c_void,
                    nbytes,
                    HIP_MEMCPY_HOST_TO_DEVICE,
                )
            },
            "hipMemcpy H2D",
        )?;
        Ok(buffer)
    }

    pub fn from_f32(device_idx: usize, values: &[f32]) -> Result<Self, RuntimeError> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::from_host(device_idx, &bytes)
    }

    /// Copy the buffer back to the host, waiting for queued work first.
    pub fn to_host(&self) -> Result<Vec<u8>, RuntimeError> {
        if self.nbytes == 0 {
            return Ok(Vec::new());
        }
        let api = ffi::require_hip()?;
        set_device(self.device_idx)?;
        device_synchronize()?;

        let mut host = vec![0u8; self.nbytes];
        check_hip(
            unsafe {
                (api.hip_memcpy)(
                    host.as_mut_ptr() as *mut c_void,
                    self.ptr as *const c_void,
                    self.nbytes,
                    HIP_MEMCPY_DEVICE_TO_HOST,
                )
            },
            "hipMemcpy D2H",
        )?;
        Ok(host)
    }

    pub fn to_f32(&self) -> Result<Vec<f32>, RuntimeError> {
        Ok(self
            .to_host()?
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.nbytes
    }

    pub fn is_empty(&self) -> bool {
        self.nbytes == 0
    }

    /// Address to bind as a kernel argument.
    pub fn device_ptr(&self) -> DevicePtr {
        DevicePtr(self.ptr as u64)
    }
}

impl Drop for HipBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            if let Some(api) = ffi::hip_api() {
                let _ = set_device(self.device_idx);
                unsafe { (api.hip_free)(self.ptr) };
            }
        }
    }
}
