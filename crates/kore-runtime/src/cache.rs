//! Per-session program and kernel cache.
//!
//! Programs are keyed by (source, build parameters); kernels by
//! (algorithm, network configuration). Both maps only grow.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RuntimeError;
use crate::kernel::Kernel;
use crate::program::{KernelSource, Program};

type ProgramKey = (KernelSource, String);
type KernelKey = (String, String);

#[derive(Default)]
pub struct KernelCache {
    programs: Mutex<HashMap<ProgramKey, Arc<Program>>>,
    kernels: Mutex<HashMap<KernelKey, Arc<Kernel>>>,
}

impl std::fmt::Debug for KernelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCache")
            .field("programs", &self.programs.lock().len())
            .field("kernels", &self.kernels.lock().len())
            .finish()
    }
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel(&self, algorithm: &str, network_config: &str) -> Option<Arc<Kernel>> {
        self.kernels
            .lock()
            .get(&(algorithm.to_string(), network_config.to_string()))
            .cloned()
    }

    /// Store `kernel` unless another caller got there first; returns the
    /// cached one either way.
    pub fn insert_kernel(
        &self,
        algorithm: &str,
        network_config: &str,
        kernel: Arc<Kernel>,
    ) -> Arc<Kernel> {
        let key = (algorithm.to_string(), network_config.to_string());
        match self.kernels.lock().entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => Arc::clone(entry.insert(kernel)),
        }
    }

    /// Cached program for `(source, params)`, building it with `load` on a miss.
    pub fn program_or_load<F>(
        &self,
        source: &KernelSource,
        params: &str,
        load: F,
    ) -> Result<Arc<Program>, RuntimeError>
    where
        F: FnOnce() -> Result<Program, RuntimeError>,
    {
        let key = (source.clone(), params.to_string());
        if let Some(found) = self.programs.lock().get(&key).cloned() {
            tracing::trace!("program cache hit: {}", source.label());
            return Ok(found);
        }
        tracing::trace!("program cache miss: {}", source.label());

        let built = Arc::new(load()?);
        match self.programs.lock().entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(built))),
        }
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.lock().len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.lock().len()
    }
}
