//! GEMM shape derivation for convolution lowerings.
//!
//! Every derivation computes the column-major problem `C = op(A) * op(B)`
//! for its operation. Row-major callers get the transposed problem
//! `C^T = op(B)^T * op(A)^T`: `M` and `N`, `lda` and `ldb`, `tA` and `tB` swap
//! places and the solver still sees a column-major descriptor.

use serde::{Deserialize, Serialize};

use crate::geometry::{DataLayout, GemmAlgorithm, GemmGeometry, Precision, SolverGeometry};
use crate::tensor::{tie4, TensorDesc};

/// A plain GEMM problem in the caller's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub t_a: bool,
    pub t_b: bool,
}

/// The operation a geometry is derived for, with its tensors.
#[derive(Clone, Copy)]
pub enum GemmProblem<'a> {
    TransposeBwdData {
        dy: &'a dyn TensorDesc,
        w: &'a dyn TensorDesc,
        dx: &'a dyn TensorDesc,
    },
    ConvBwdData {
        dy: &'a dyn TensorDesc,
        w: &'a dyn TensorDesc,
        dx: &'a dyn TensorDesc,
    },
    ConvBwdWeights {
        dy: &'a dyn TensorDesc,
        x: &'a dyn TensorDesc,
        dw: &'a dyn TensorDesc,
    },
    ConvFwd {
        x: &'a dyn TensorDesc,
        w: &'a dyn TensorDesc,
        y: &'a dyn TensorDesc,
    },
    Gemm {
        shape: GemmShape,
        alpha: f32,
        beta: f32,
    },
}

impl GemmProblem<'_> {
    pub fn algorithm(&self) -> GemmAlgorithm {
        match self {
            GemmProblem::TransposeBwdData { .. } => GemmAlgorithm::TransposeBwdData,
            GemmProblem::ConvBwdData { .. } => GemmAlgorithm::ConvBwdData,
            GemmProblem::ConvBwdWeights { .. } => GemmAlgorithm::ConvBwdWeights,
            GemmProblem::ConvFwd { .. } => GemmAlgorithm::ConvFwd,
            GemmProblem::Gemm { .. } => GemmAlgorithm::Gemm,
        }
    }
}

/// Derive the geometry for `problem` and its network configuration string.
pub fn derive_geometry(problem: GemmProblem<'_>, layout: DataLayout) -> (GemmGeometry, String) {
    let geometry = match problem {
        GemmProblem::TransposeBwdData { dy, w, dx } => transpose_bwd_data(dy, w, dx, layout),
        GemmProblem::ConvBwdData { dy, w, dx } => conv_bwd_data(dy, w, dx, layout),
        GemmProblem::ConvBwdWeights { dy, x, dw } => conv_bwd_weights(dy, x, dw, layout),
        GemmProblem::ConvFwd { x, w, y } => conv_fwd(x, w, y, layout),
        GemmProblem::Gemm { shape, alpha, beta } => gemm(shape, layout, alpha, beta),
    };
    let network_config = geometry.network_config();
    (geometry, network_config)
}

fn build(
    algorithm: GemmAlgorithm,
    shape: GemmShape,
    layout: DataLayout,
    alpha: f32,
    beta: f32,
) -> GemmGeometry {
    let GemmShape {
        m,
        n,
        k,
        lda,
        ldb,
        ldc,
        t_a,
        t_b,
    } = shape;
    let solver = |t_a, t_b, lda, ldb, m, n| SolverGeometry {
        col_major: true,
        t_a,
        t_b,
        t_c: false,
        lda,
        ldb,
        ldc,
        m,
        n,
        k,
        workspace_size: 0,
        precision: Precision::Single,
    };
    let geometry = match layout {
        DataLayout::ColumnMajor => GemmGeometry::new(
            algorithm,
            layout,
            [m, n, k],
            [lda, ldb, ldc],
            solver(t_a, t_b, lda, ldb, m, n),
            alpha,
            beta,
        ),
        DataLayout::RowMajor => GemmGeometry::new(
            algorithm,
            layout,
            [n, m, k],
            [ldb, lda, ldc],
            solver(t_b, t_a, ldb, lda, n, m),
            alpha,
            beta,
        ),
    };
    tracing::trace!(
        "derived {} geometry m={} n={} k={} ({:?})",
        algorithm,
        m,
        n,
        k,
        layout
    );
    geometry
}

/// Transposed-convolution backward data. `w` is laid out `(C, N, H, W)`.
pub fn transpose_bwd_data(
    dy: &dyn TensorDesc,
    w: &dyn TensorDesc,
    dx: &dyn TensorDesc,
    layout: DataLayout,
) -> GemmGeometry {
    let (_, _, in_h, in_w) = tie4(dx);
    let (wei_c, wei_n, wei_h, wei_w) = tie4(w);
    tie4(dy);

    let k = wei_n * wei_h * wei_w;
    let m = wei_c;
    let n = in_h * in_w;
    let shape = GemmShape {
        m,
        n,
        k,
        lda: k,
        ldb: n,
        ldc: n,
        t_a: false,
        t_b: false,
    };
    build(GemmAlgorithm::TransposeBwdData, shape, layout, 1.0, 0.0)
}

pub fn conv_bwd_data(
    dy: &dyn TensorDesc,
    w: &dyn TensorDesc,
    dx: &dyn TensorDesc,
    layout: DataLayout,
) -> GemmGeometry {
    let (_, in_c, _, _) = tie4(dx);
    let (wei_n, _, wei_h, wei_w) = tie4(w);
    let (_, _, out_h, out_w) = tie4(dy);

    let k = wei_n;
    let m = in_c * wei_h * wei_w;
    let n = out_h * out_w;
    let shape = GemmShape {
        m,
        n,
        k,
        lda: m,
        ldb: n,
        ldc: n,
        t_a: true,
        t_b: false,
    };
    build(GemmAlgorithm::ConvBwdData, shape, layout, 1.0, 0.0)
}

/// Weight gradient. Accumulates into `dw`, so beta starts at 1.
pub fn conv_bwd_weights(
    dy: &dyn TensorDesc,
    x: &dyn TensorDesc,
    dw: &dyn TensorDesc,
    layout: DataLayout,
) -> GemmGeometry {
    let (_, in_c, _, _) = tie4(x);
    let (wei_n, _, wei_h, wei_w) = tie4(dw);
    let (_, _, out_h, out_w) = tie4(dy);

    let n = in_c * wei_h * wei_w;
    let m = wei_n;
    let k = out_h * out_w;
    let shape = GemmShape {
        m,
        n,
        k,
        lda: k,
        ldb: k,
        ldc: n,
        t_a: false,
        t_b: true,
    };
    build(GemmAlgorithm::ConvBwdWeights, shape, layout, 1.0, 1.0)
}

pub fn conv_fwd(
    x: &dyn TensorDesc,
    w: &dyn TensorDesc,
    y: &dyn TensorDesc,
    layout: DataLayout,
) -> GemmGeometry {
    let (_, in_c, _, _) = tie4(x);
    let (wei_n, _, wei_h, wei_w) = tie4(w);
    let (_, _, out_h, out_w) = tie4(y);

    let k = in_c * wei_h * wei_w;
    let m = wei_n;
    let n = out_h * out_w;
    let shape = GemmShape {
        m,
        n,
        k,
        lda: k,
        ldb: n,
        ldc: n,
        t_a: false,
        t_b: false,
    };
    build(GemmAlgorithm::ConvFwd, shape, layout, 1.0, 0.0)
}

/// A caller-specified GEMM with explicit scales.
pub fn gemm(shape: GemmShape, layout: DataLayout, alpha: f32, beta: f32) -> GemmGeometry {
    build(GemmAlgorithm::Gemm, shape, layout, alpha, beta)
}
