//! GEMM-layer errors.

use kore_runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum GemmError {
    /// No geometry was resolved under this key.
    #[error("looking for gemm geometry (does not exist): {algorithm}, {network_config}")]
    NotFound {
        algorithm: String,
        network_config: String,
    },

    #[error("gemm solver failed: {0}")]
    Solver(String),

    #[error("gemm solver returned no kernels")]
    EmptySolution,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl GemmError {
    pub fn not_found(algorithm: &str, network_config: &str) -> Self {
        GemmError::NotFound {
            algorithm: algorithm.to_string(),
            network_config: network_config.to_string(),
        }
    }
}
