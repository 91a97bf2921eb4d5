//! Runtime-layer errors.

/// Errors raised while loading programs, creating kernels and launching them.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("GPU runtime not available: {0}")]
    NotAvailable(String),

    #[error("runtime error {code} in {context}")]
    Runtime { code: i32, context: String },

    #[error("program build failed (status {status}): {log}")]
    Build { status: i32, log: String },

    #[error("assembler failed: {diagnostic}")]
    Assembly { diagnostic: String },

    #[error("error setting argument #{index} to kernel (size = {size}): {status}")]
    ArgumentBinding { index: u32, size: usize, status: i32 },

    #[error("kernel source '{name}' not found")]
    SourceNotFound { name: String },

    #[error("looking for kernel (does not exist): {algorithm}, {network_config}")]
    KernelNotFound {
        algorithm: String,
        network_config: String,
    },

    #[error("invalid runtime configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Build error without a usable log.
    pub fn build(status: i32, log: impl Into<String>) -> Self {
        RuntimeError::Build {
            status,
            log: log.into(),
        }
    }

    pub fn runtime(code: i32, context: impl Into<String>) -> Self {
        RuntimeError::Runtime {
            code,
            context: context.into(),
        }
    }
}
