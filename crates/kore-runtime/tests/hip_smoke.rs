//! Launches a tiny hiprtc-compiled kernel on the first HIP device.
//! Skips silently when no device is present.
#![cfg(feature = "rocm")]

use kore_runtime::hip::{is_rocm_available, HipBuffer};
use kore_runtime::{kernel_args, Handle, KernelSource, KernelSpec};

const SCALE_SRC: &str = r#"
extern "C" __global__ void scale(float* x, float alpha, unsigned int n) {
    unsigned int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) x[i] *= alpha;
}
"#;

#[test]
fn test_hip_scale_kernel() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    if !is_rocm_available() {
        eprintln!("ROCm not available, skipping");
        return;
    }
    let handle = Handle::hip(0).unwrap();
    let source = KernelSource::inline(SCALE_SRC);
    let kernel = handle
        .get_kernel(
            "scale",
            "n1000",
            KernelSpec {
                source: &source,
                entry: "scale",
                local: &[64],
                global: &[1024],
                params: "",
            },
        )
        .unwrap();

    let host: Vec<f32> = (0..1000).map(|i| i as f32).collect();
    let buf = HipBuffer::from_f32(0, &host).unwrap();
    kernel
        .invoke()
        .call(&kernel_args![buf.device_ptr(), 2.0f32, 1000u32])
        .unwrap();

    let out = buf.to_f32().unwrap();
    assert_eq!(out.len(), 1000);
    assert_eq!(out[0], 0.0);
    assert_eq!(out[999], 1998.0);
}
