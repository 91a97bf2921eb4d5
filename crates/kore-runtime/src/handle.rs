//! The per-session runtime handle.

use std::sync::Arc;

use crate::assembler::{Assembler, ExternalAssembler};
use crate::cache::KernelCache;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::kernel::Kernel;
use crate::program::{KernelSource, Program, ProgramLoader};
use crate::runtime::DeviceRuntime;
use crate::sources::{DirectorySources, EmbeddedKernels, KernelSources};

/// Everything needed to build a kernel that is not yet cached.
#[derive(Debug, Clone, Copy)]
pub struct KernelSpec<'a> {
    pub source: &'a KernelSource,
    /// Entry point inside the built program.
    pub entry: &'a str,
    pub local: &'a [usize],
    pub global: &'a [usize],
    /// Build parameters passed to the compiler or assembler.
    pub params: &'a str,
}

/// Runtime, kernel sources and caches for one session.
///
/// `Handle` is `Send + Sync`; the caches serialize their own updates.
pub struct Handle {
    runtime: Arc<dyn DeviceRuntime>,
    sources: Box<dyn KernelSources>,
    assembler: Box<dyn Assembler>,
    config: RuntimeConfig,
    cache: KernelCache,
}

impl Handle {
    /// Session over `runtime`. Named sources come from `config.kernel_dir`
    /// when set, otherwise from an empty embedded table.
    pub fn new(runtime: Arc<dyn DeviceRuntime>, config: RuntimeConfig) -> Self {
        let sources: Box<dyn KernelSources> = match &config.kernel_dir {
            Some(dir) => Box::new(DirectorySources::new(dir)),
            None => Box::new(EmbeddedKernels::new()),
        };
        let assembler = Box::new(ExternalAssembler::new(config.assembler.clone()));
        Self {
            runtime,
            sources,
            assembler,
            config,
            cache: KernelCache::new(),
        }
    }

    /// Session on HIP device `device_idx`, configured from the environment.
    #[cfg(feature = "rocm")]
    pub fn hip(device_idx: i32) -> Result<Self, RuntimeError> {
        let runtime = crate::hip::HipRuntime::new(device_idx)?;
        Ok(Self::new(Arc::new(runtime), RuntimeConfig::from_env()))
    }

    pub fn with_sources(mut self, sources: impl KernelSources + 'static) -> Self {
        self.sources = Box::new(sources);
        self
    }

    pub fn with_assembler(mut self, assembler: impl Assembler + 'static) -> Self {
        self.assembler = Box::new(assembler);
        self
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn loader(&self) -> ProgramLoader<'_> {
        ProgramLoader {
            runtime: &self.runtime,
            sources: self.sources.as_ref(),
            assembler: self.assembler.as_ref(),
            config: &self.config,
        }
    }

    /// Program for `(source, params)`, built on first use.
    pub fn load_program(
        &self,
        source: &KernelSource,
        params: &str,
    ) -> Result<Arc<Program>, RuntimeError> {
        self.cache
            .program_or_load(source, params, || self.loader().load(source, params))
    }

    /// Kernel cached under `(algorithm, network_config)`, or a new one built
    /// from `spec` and cached there.
    pub fn get_kernel(
        &self,
        algorithm: &str,
        network_config: &str,
        spec: KernelSpec<'_>,
    ) -> Result<Arc<Kernel>, RuntimeError> {
        if let Some(kernel) = self.cache.kernel(algorithm, network_config) {
            return Ok(kernel);
        }
        let program = self.load_program(spec.source, spec.params)?;
        let kernel = Arc::new(Kernel::new(program, spec.entry, spec.local, spec.global)?);
        tracing::debug!(
            "kernel {} cached for {}, {}",
            spec.entry,
            algorithm,
            network_config
        );
        Ok(self.cache.insert_kernel(algorithm, network_config, kernel))
    }

    /// A kernel previously built with [`Handle::get_kernel`].
    pub fn cached_kernel(
        &self,
        algorithm: &str,
        network_config: &str,
    ) -> Result<Arc<Kernel>, RuntimeError> {
        self.cache
            .kernel(algorithm, network_config)
            .ok_or_else(|| RuntimeError::KernelNotFound {
                algorithm: algorithm.to_string(),
                network_config: network_config.to_string(),
            })
    }

    pub fn has_kernel(&self, algorithm: &str, network_config: &str) -> bool {
        self.cache.kernel(algorithm, network_config).is_some()
    }

    pub fn kernel_count(&self) -> usize {
        self.cache.kernel_count()
    }

    pub fn program_count(&self) -> usize {
        self.cache.program_count()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("backend", &self.runtime.backend_name())
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}
