//! An in-memory [`DeviceRuntime`] that records what it is asked to do.
//!
//! Builds always succeed unless a failure is injected; launches do nothing
//! but are recorded with a snapshot of the bound arguments.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::RuntimeError;
use crate::runtime::{DeviceRuntime, LaunchDims, RawKernel, RawModule};

/// Which build entry point a program went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPath {
    Source,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub path: BuildPath,
    pub contents: Vec<u8>,
    /// Empty for binary builds.
    pub options: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedArg {
    Value(Vec<u8>),
    Local(usize),
}

impl RecordedArg {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            RecordedArg::Value(bytes) => bytes
                .as_slice()
                .try_into()
                .ok()
                .map(f32::from_ne_bytes),
            RecordedArg::Local(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            RecordedArg::Value(bytes) => bytes
                .as_slice()
                .try_into()
                .ok()
                .map(u32::from_ne_bytes),
            RecordedArg::Local(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RecordedArg::Value(bytes) => bytes
                .as_slice()
                .try_into()
                .ok()
                .map(u64::from_ne_bytes),
            RecordedArg::Local(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLaunch {
    pub kernel: String,
    pub local: SmallVec<[usize; 3]>,
    pub global: SmallVec<[usize; 3]>,
    pub args: Vec<RecordedArg>,
}

#[derive(Debug, Clone)]
struct InjectedBuildFailure {
    marker: String,
    status: i32,
    log: String,
}

#[derive(Debug, Default)]
struct KernelState {
    name: String,
    args: BTreeMap<u32, RecordedArg>,
}

#[derive(Debug, Default)]
struct State {
    next_handle: usize,
    builds: Vec<BuildRecord>,
    live_programs: usize,
    kernels: HashMap<usize, KernelState>,
    created_kernels: Vec<String>,
    launches: Vec<RecordedLaunch>,
    build_failure: Option<InjectedBuildFailure>,
    arg_failure: Option<(u32, i32)>,
}

/// Recording fake of a GPU runtime.
#[derive(Debug)]
pub struct RecordingRuntime {
    device: String,
    state: Mutex<State>,
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new("gfx906")
    }
}

impl RecordingRuntime {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Fail every later build whose contents contain `marker`.
    pub fn fail_builds_containing(&self, marker: &str, status: i32, log: &str) {
        self.state.lock().build_failure = Some(InjectedBuildFailure {
            marker: marker.to_string(),
            status,
            log: log.to_string(),
        });
    }

    /// Reject binding slot `index` with `status`.
    pub fn fail_arg(&self, index: u32, status: i32) {
        self.state.lock().arg_failure = Some((index, status));
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.state.lock().builds.clone()
    }

    pub fn launches(&self) -> Vec<RecordedLaunch> {
        self.state.lock().launches.clone()
    }

    /// Entry names passed to `create_kernel`, in order.
    pub fn created_kernels(&self) -> Vec<String> {
        self.state.lock().created_kernels.clone()
    }

    /// Arguments currently bound to the live kernel named `name`.
    pub fn bound_args(&self, name: &str) -> Option<BTreeMap<u32, RecordedArg>> {
        self.state
            .lock()
            .kernels
            .values()
            .find(|k| k.name == name)
            .map(|k| k.args.clone())
    }

    pub fn live_programs(&self) -> usize {
        self.state.lock().live_programs
    }

    pub fn live_kernels(&self) -> usize {
        self.state.lock().kernels.len()
    }

    fn build(
        &self,
        path: BuildPath,
        contents: &[u8],
        options: &str,
    ) -> Result<RawModule, RuntimeError> {
        let mut state = self.state.lock();
        if let Some(failure) = &state.build_failure {
            let text = String::from_utf8_lossy(contents);
            if text.contains(failure.marker.as_str()) {
                return Err(RuntimeError::build(failure.status, failure.log.clone()));
            }
        }
        state.builds.push(BuildRecord {
            path,
            contents: contents.to_vec(),
            options: options.to_string(),
        });
        state.next_handle += 1;
        state.live_programs += 1;
        Ok(RawModule(state.next_handle))
    }
}

impl DeviceRuntime for RecordingRuntime {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn device_name(&self) -> Result<String, RuntimeError> {
        Ok(self.device.clone())
    }

    fn source_standard_flag(&self) -> &str {
        "-std=c++17"
    }

    fn build_program_from_source(
        &self,
        source: &[u8],
        options: &str,
    ) -> Result<RawModule, RuntimeError> {
        self.build(BuildPath::Source, source, options)
    }

    fn build_program_from_binary(&self, binary: &[u8]) -> Result<RawModule, RuntimeError> {
        self.build(BuildPath::Binary, binary, "")
    }

    fn release_program(&self, _module: RawModule) {
        let mut state = self.state.lock();
        state.live_programs = state.live_programs.saturating_sub(1);
    }

    fn create_kernel(&self, _module: RawModule, name: &str) -> Result<RawKernel, RuntimeError> {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.kernels.insert(
            handle,
            KernelState {
                name: name.to_string(),
                args: BTreeMap::new(),
            },
        );
        state.created_kernels.push(name.to_string());
        Ok(RawKernel(handle))
    }

    fn release_kernel(&self, kernel: RawKernel) {
        self.state.lock().kernels.remove(&kernel.0);
    }

    fn set_kernel_arg(
        &self,
        kernel: RawKernel,
        index: u32,
        size: usize,
        value: Option<&[u8]>,
    ) -> Result<(), i32> {
        let mut state = self.state.lock();
        if let Some((bad, status)) = state.arg_failure {
            if bad == index {
                return Err(status);
            }
        }
        let arg = match value {
            Some(bytes) => RecordedArg::Value(bytes.to_vec()),
            None => RecordedArg::Local(size),
        };
        let entry = state.kernels.get_mut(&kernel.0).ok_or(-1)?;
        entry.args.insert(index, arg);
        Ok(())
    }

    fn enqueue_kernel(&self, kernel: RawKernel, dims: &LaunchDims) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        let entry = state
            .kernels
            .get(&kernel.0)
            .ok_or_else(|| RuntimeError::runtime(-1, "enqueue of released kernel"))?;
        let launch = RecordedLaunch {
            kernel: entry.name.clone(),
            local: dims.local.clone(),
            global: dims.global.clone(),
            args: entry.args.values().cloned().collect(),
        };
        state.launches.push(launch);
        Ok(())
    }
}
