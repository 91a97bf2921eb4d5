//! GEMM geometry records and their solver descriptors.

use std::fmt;

use kore_runtime::{kernel_args, DevicePtr, Handle};
use serde::{Deserialize, Serialize};

use crate::error::GemmError;

/// Known GEMM-backed operations. The tag is the first half of every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GemmAlgorithm {
    TransposeBwdData,
    ConvBwdData,
    ConvBwdWeights,
    ConvFwd,
    Gemm,
}

impl GemmAlgorithm {
    pub const ALL: [GemmAlgorithm; 5] = [
        GemmAlgorithm::TransposeBwdData,
        GemmAlgorithm::ConvBwdData,
        GemmAlgorithm::ConvBwdWeights,
        GemmAlgorithm::ConvFwd,
        GemmAlgorithm::Gemm,
    ];

    /// Stable name, used as the kernel-cache key of the primary kernel.
    pub fn name(&self) -> &'static str {
        match self {
            GemmAlgorithm::TransposeBwdData => "kore_transpose_bwd_data_gemm",
            GemmAlgorithm::ConvBwdData => "kore_conv_bwd_data_gemm",
            GemmAlgorithm::ConvBwdWeights => "kore_conv_bwd_weights_gemm",
            GemmAlgorithm::ConvFwd => "kore_conv_fwd_gemm",
            GemmAlgorithm::Gemm => "kore_gemm",
        }
    }

    /// Kernel-cache key of the beta-scaling kernel.
    pub fn beta_kernel_name(&self) -> String {
        format!("{}_beta", self.name())
    }
}

impl fmt::Display for GemmAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory order the caller's matrices are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLayout {
    RowMajor,
    ColumnMajor,
}

impl DataLayout {
    pub fn from_col_major(is_col_major: bool) -> Self {
        if is_col_major {
            DataLayout::ColumnMajor
        } else {
            DataLayout::RowMajor
        }
    }

    pub fn is_col_major(&self) -> bool {
        matches!(self, DataLayout::ColumnMajor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Precision {
    #[default]
    Single,
    Double,
}

impl Precision {
    pub fn tag(&self) -> char {
        match self {
            Precision::Single => 'f',
            Precision::Double => 'd',
        }
    }
}

/// The descriptor handed to the GEMM solver. Always column-major after the
/// row-major axis swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SolverGeometry {
    pub col_major: bool,
    pub t_a: bool,
    pub t_b: bool,
    pub t_c: bool,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub workspace_size: usize,
    pub precision: Precision,
}

impl SolverGeometry {
    /// Canonical string for this descriptor; the second half of every cache key.
    pub fn network_config(&self) -> String {
        format!(
            "tC{}_tA{}_tB{}_colMaj{}_m{}_n{}_k{}_lda{}_ldb{}_ldc{}_ws{}_{}",
            u8::from(self.t_c),
            u8::from(self.t_a),
            u8::from(self.t_b),
            u8::from(self.col_major),
            self.m,
            self.n,
            self.k,
            self.lda,
            self.ldb,
            self.ldc,
            self.workspace_size,
            self.precision.tag()
        )
    }

    /// Number of elements `a` spans, in the solver's (column-major) view.
    pub fn a_extent(&self) -> usize {
        let cols = if self.t_a { self.m } else { self.k };
        self.lda * cols
    }

    pub fn b_extent(&self) -> usize {
        let cols = if self.t_b { self.k } else { self.n };
        self.ldb * cols
    }

    pub fn c_extent(&self) -> usize {
        let cols = if self.t_c { self.m } else { self.n };
        self.ldc * cols
    }
}

/// Registry key: operation tag plus network configuration string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    pub algorithm: GemmAlgorithm,
    pub network_config: String,
}

impl GeometryKey {
    pub fn new(algorithm: GemmAlgorithm, network_config: impl Into<String>) -> Self {
        Self {
            algorithm,
            network_config: network_config.into(),
        }
    }
}

/// Device buffers and element offsets for one GEMM launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GemmOperands {
    pub a: DevicePtr,
    pub a_offset: u32,
    pub b: DevicePtr,
    pub b_offset: u32,
    pub c: DevicePtr,
    pub c_offset: u32,
}

impl GemmOperands {
    pub fn new(a: DevicePtr, b: DevicePtr, c: DevicePtr) -> Self {
        Self {
            a,
            b,
            c,
            ..Default::default()
        }
    }

    pub fn with_offsets(mut self, a_offset: u32, b_offset: u32, c_offset: u32) -> Self {
        self.a_offset = a_offset;
        self.b_offset = b_offset;
        self.c_offset = c_offset;
        self
    }
}

/// A fully resolved GEMM shape for one operation instance.
///
/// `dims` and `strides` are in solver order: `{N, M, K}` / `{ldb, lda, ldc}`
/// for row-major callers, `{M, N, K}` / `{lda, ldb, ldc}` for column-major.
/// The logical accessors ([`GemmGeometry::m`] etc.) undo that swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmGeometry {
    pub algorithm: GemmAlgorithm,
    pub layout: DataLayout,
    pub dims: [usize; 3],
    pub strides: [usize; 3],
    pub alpha: f32,
    pub beta: f32,
    pub solver: SolverGeometry,
    beta_kernel_returned: bool,
    beta_kernel_required: bool,
}

impl GemmGeometry {
    pub fn new(
        algorithm: GemmAlgorithm,
        layout: DataLayout,
        dims: [usize; 3],
        strides: [usize; 3],
        solver: SolverGeometry,
        alpha: f32,
        beta: f32,
    ) -> Self {
        Self {
            algorithm,
            layout,
            dims,
            strides,
            alpha,
            beta,
            solver,
            beta_kernel_returned: false,
            beta_kernel_required: false,
        }
    }

    /// Same shape with different scale factors. Clears the beta-kernel flags.
    pub fn with_scales(mut self, alpha: f32, beta: f32) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self.beta_kernel_returned = false;
        self.beta_kernel_required = false;
        self
    }

    pub fn network_config(&self) -> String {
        self.solver.network_config()
    }

    pub fn key(&self) -> GeometryKey {
        GeometryKey::new(self.algorithm, self.network_config())
    }

    fn swapped(&self) -> bool {
        self.layout == DataLayout::RowMajor
    }

    pub fn m(&self) -> usize {
        if self.swapped() {
            self.dims[1]
        } else {
            self.dims[0]
        }
    }

    pub fn n(&self) -> usize {
        if self.swapped() {
            self.dims[0]
        } else {
            self.dims[1]
        }
    }

    pub fn k(&self) -> usize {
        self.dims[2]
    }

    pub fn lda(&self) -> usize {
        if self.swapped() {
            self.strides[1]
        } else {
            self.strides[0]
        }
    }

    pub fn ldb(&self) -> usize {
        if self.swapped() {
            self.strides[0]
        } else {
            self.strides[1]
        }
    }

    pub fn ldc(&self) -> usize {
        self.strides[2]
    }

    /// The solver returned a separate beta-scaling kernel.
    pub fn beta_kernel_returned(&self) -> bool {
        self.beta_kernel_returned
    }

    /// The beta-scaling kernel runs before every primary launch.
    pub fn beta_kernel_required(&self) -> bool {
        self.beta_kernel_required
    }

    pub(crate) fn set_beta_kernel_returned(&mut self, returned: bool) {
        self.beta_kernel_returned = returned;
    }

    pub(crate) fn enable_beta_kernel(&mut self, enable: bool) {
        self.beta_kernel_required = enable;
    }

    /// Launch the kernel(s) resolved for this geometry.
    ///
    /// With a beta kernel, `c` is scaled in place first and the primary
    /// kernel then accumulates `alpha * op(a) * op(b)` into it; both go to the
    /// same in-order queue. Never waits for completion.
    pub fn run(&self, handle: &Handle, operands: &GemmOperands) -> Result<(), GemmError> {
        let network_config = self.network_config();
        let primary = handle.cached_kernel(self.algorithm.name(), &network_config)?;
        let GemmOperands {
            a,
            a_offset,
            b,
            b_offset,
            c,
            c_offset,
        } = *operands;

        if self.beta_kernel_required {
            let beta_kernel =
                handle.cached_kernel(&self.algorithm.beta_kernel_name(), &network_config)?;
            beta_kernel
                .invoke()
                .call(&kernel_args![c, c_offset, self.beta])?;
            primary
                .invoke()
                .call(&kernel_args![a, a_offset, b, b_offset, c, c_offset, self.alpha])?;
        } else if self.beta_kernel_returned {
            // Compiled for beta == 1: no beta slot.
            primary
                .invoke()
                .call(&kernel_args![a, a_offset, b, b_offset, c, c_offset, self.alpha])?;
        } else {
            primary.invoke().call(&kernel_args![
                a, a_offset, b, b_offset, c, c_offset, self.alpha, self.beta
            ])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> SolverGeometry {
        SolverGeometry {
            col_major: true,
            t_a: false,
            t_b: false,
            t_c: false,
            lda: 784,
            ldb: 75,
            ldc: 784,
            m: 784,
            n: 16,
            k: 75,
            workspace_size: 0,
            precision: Precision::Single,
        }
    }

    #[test]
    fn test_network_config_format() {
        assert_eq!(
            solver().network_config(),
            "tC0_tA0_tB0_colMaj1_m784_n16_k75_lda784_ldb75_ldc784_ws0_f"
        );
    }

    #[test]
    fn test_network_config_distinguishes_fields() {
        let base = solver();
        let mut other = base;
        other.t_a = true;
        assert_ne!(base.network_config(), other.network_config());
        let mut other = base;
        other.precision = Precision::Double;
        assert_ne!(base.network_config(), other.network_config());
    }

    #[test]
    fn test_logical_accessors_undo_swap() {
        let g = GemmGeometry::new(
            GemmAlgorithm::ConvFwd,
            DataLayout::RowMajor,
            [784, 16, 75],
            [784, 75, 784],
            solver(),
            1.0,
            0.0,
        );
        assert_eq!((g.m(), g.n(), g.k()), (16, 784, 75));
        assert_eq!((g.lda(), g.ldb(), g.ldc()), (75, 784, 784));

        let col = GemmGeometry {
            layout: DataLayout::ColumnMajor,
            ..g.clone()
        };
        assert_eq!((col.m(), col.n()), (784, 16));
    }

    #[test]
    fn test_algorithm_names_are_distinct() {
        let mut names: Vec<_> = GemmAlgorithm::ALL.iter().map(|a| a.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), GemmAlgorithm::ALL.len());
        assert_eq!(
            GemmAlgorithm::ConvFwd.beta_kernel_name(),
            "kore_conv_fwd_gemm_beta"
        );
    }

    #[test]
    fn test_with_scales_resets_flags() {
        let mut g = GemmGeometry::new(
            GemmAlgorithm::Gemm,
            DataLayout::ColumnMajor,
            [4, 4, 4],
            [4, 4, 4],
            solver(),
            1.0,
            0.0,
        );
        g.set_beta_kernel_returned(true);
        g.enable_beta_kernel(true);
        let g = g.with_scales(2.0, 0.5);
        assert!(!g.beta_kernel_returned());
        assert!(!g.beta_kernel_required());
        assert_eq!(g.alpha, 2.0);
    }
}
