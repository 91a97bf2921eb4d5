//! Named kernel-source lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::RuntimeError;

/// Resolves a kernel file name to its contents (source text, assembly text
/// or a prebuilt binary).
pub trait KernelSources: Send + Sync {
    fn kernel_source(&self, name: &str) -> Result<Vec<u8>, RuntimeError>;
}

/// In-memory table of kernel sources, typically filled from `include_bytes!`.
#[derive(Default)]
pub struct EmbeddedKernels {
    entries: RwLock<HashMap<String, &'static [u8]>>,
}

impl EmbeddedKernels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `contents` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, contents: &'static [u8]) {
        self.entries.write().insert(name.into(), contents);
    }

    pub fn with(self, name: impl Into<String>, contents: &'static [u8]) -> Self {
        self.register(name, contents);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KernelSources for EmbeddedKernels {
    fn kernel_source(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        self.entries
            .read()
            .get(name)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| RuntimeError::SourceNotFound {
                name: name.to_string(),
            })
    }
}

/// Kernel sources read from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySources {
    root: PathBuf,
}

impl DirectorySources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl KernelSources for DirectorySources {
    fn kernel_source(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        // Names are flat file names; anything that could escape the root is unknown.
        let file = Path::new(name);
        if file.components().count() != 1 || file.is_absolute() {
            return Err(RuntimeError::SourceNotFound {
                name: name.to_string(),
            });
        }
        match std::fs::read(self.root.join(file)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RuntimeError::SourceNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
