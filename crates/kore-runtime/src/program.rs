//! Program loading: source, assembly and prebuilt binary kernels.
//!
//! A [`Program`] owns a built module in the runtime and unloads it when the
//! last [`crate::Kernel`] referencing it goes away. The loader never caches;
//! reuse is the job of [`crate::KernelCache`].

use std::fmt;
use std::sync::Arc;

use crate::assembler::Assembler;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::runtime::{DeviceRuntime, RawModule};
use crate::sources::KernelSources;

/// File extension of assembly-text kernels.
pub const ASSEMBLY_EXTENSION: &str = ".s";

/// File extension of prebuilt code objects.
pub const BINARY_EXTENSION: &str = ".so";

/// Where a program's contents come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KernelSource {
    /// A file name resolved through [`KernelSources`].
    Named(String),
    /// Kernel source text supplied directly (e.g. by a GEMM solver).
    Inline(String),
}

impl KernelSource {
    pub fn named(name: impl Into<String>) -> Self {
        KernelSource::Named(name.into())
    }

    pub fn inline(text: impl Into<String>) -> Self {
        KernelSource::Inline(text.into())
    }

    /// How the contents will be built.
    pub fn kind(&self) -> ProgramKind {
        match self {
            KernelSource::Inline(_) => ProgramKind::Source,
            KernelSource::Named(name) if name.ends_with(ASSEMBLY_EXTENSION) => {
                ProgramKind::Assembly
            }
            KernelSource::Named(name) if name.ends_with(BINARY_EXTENSION) => ProgramKind::Binary,
            KernelSource::Named(_) => ProgramKind::Source,
        }
    }

    /// Short label for logs; inline sources are not printed in full.
    pub fn label(&self) -> String {
        match self {
            KernelSource::Named(name) => name.clone(),
            KernelSource::Inline(text) => format!("<inline {} bytes>", text.len()),
        }
    }
}

/// Build path taken for a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Source,
    Assembly,
    Binary,
}

/// A built, loadable module. Shared by every kernel created from it.
pub struct Program {
    runtime: Arc<dyn DeviceRuntime>,
    module: RawModule,
    name: String,
    kind: ProgramKind,
}

impl Program {
    pub fn raw(&self) -> RawModule {
        self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub(crate) fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("module", &self.module)
            .finish()
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.runtime.release_program(self.module);
    }
}

/// Borrowed view of everything needed to turn a [`KernelSource`] into a
/// [`Program`].
pub struct ProgramLoader<'a> {
    pub runtime: &'a Arc<dyn DeviceRuntime>,
    pub sources: &'a dyn KernelSources,
    pub assembler: &'a dyn Assembler,
    pub config: &'a RuntimeConfig,
}

impl ProgramLoader<'_> {
    /// Fetch, (assemble,) build and load `source` with build parameters `params`.
    pub fn load(&self, source: &KernelSource, params: &str) -> Result<Program, RuntimeError> {
        let kind = source.kind();
        let mut contents = match source {
            KernelSource::Inline(text) => text.clone().into_bytes(),
            KernelSource::Named(name) => self.sources.kernel_source(name)?,
        };

        if kind == ProgramKind::Assembly {
            let device = self.runtime.device_name()?;
            self.assembler.assemble(&mut contents, &device, params)?;
        }

        let module = match kind {
            ProgramKind::Assembly | ProgramKind::Binary => {
                tracing::debug!(
                    "building {} from {} byte code object",
                    source.label(),
                    contents.len()
                );
                self.runtime.build_program_from_binary(&contents)?
            }
            ProgramKind::Source => {
                let options = self.source_options(params);
                tracing::debug!(
                    "building {} from source on {} with options '{}'",
                    source.label(),
                    self.runtime.backend_name(),
                    options
                );
                self.runtime.build_program_from_source(&contents, &options)?
            }
        };

        Ok(Program {
            runtime: Arc::clone(self.runtime),
            module,
            name: source.label(),
            kind,
        })
    }

    fn source_options(&self, params: &str) -> String {
        let mut options = params.trim().to_string();
        options.push_str(&self.config.source_build_suffix());
        let standard = self.runtime.source_standard_flag();
        if !standard.is_empty() {
            options.push(' ');
            options.push_str(standard);
        }
        options.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(KernelSource::named("gemm.cpp").kind(), ProgramKind::Source);
        assert_eq!(KernelSource::named("conv3x3.s").kind(), ProgramKind::Assembly);
        assert_eq!(KernelSource::named("conv1x1.so").kind(), ProgramKind::Binary);
        // Inline text is always source, whatever it ends with.
        assert_eq!(KernelSource::inline("x.s").kind(), ProgramKind::Source);
    }

    #[test]
    fn test_inline_label_is_short() {
        let label = KernelSource::inline("a".repeat(4096)).label();
        assert_eq!(label, "<inline 4096 bytes>");
    }
}
