//! The GEMM solver seam and a deterministic default solver.

use std::fmt::Write as _;
use std::time::Duration;

use kore_runtime::{DevicePtr, Handle, KernelSource};
use serde::{Deserialize, Serialize};

use crate::error::GemmError;
use crate::geometry::{Precision, SolverGeometry};

/// Work-group size used by [`DefaultSolver`] kernels.
pub const DEFAULT_LOCAL_WORK_SIZE: usize = 256;

/// `k` at or above which [`DefaultSolver`] splits beta scaling into its own kernel.
pub const SPLIT_K_THRESHOLD: usize = 1024;

/// Knobs for a device-driven kernel search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Quality/time trade-off hint; not a deadline.
    pub time_budget: Duration,
    pub enforce_determinism: bool,
    pub verbose: bool,
    /// Warn when the returned kernels may be sub-optimal.
    pub warnings: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            time_budget: Duration::ZERO,
            enforce_determinism: true,
            verbose: false,
            warnings: true,
        }
    }
}

/// Everything a search may touch: the session, the operand buffers and the
/// descriptor being solved.
#[derive(Clone, Copy)]
pub struct SearchRequest<'a> {
    pub handle: &'a Handle,
    pub geometry: &'a SolverGeometry,
    pub a: DevicePtr,
    pub b: DevicePtr,
    pub c: DevicePtr,
    pub options: &'a SearchOptions,
}

/// One compiled unit of a solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionKernel {
    pub source: KernelSource,
    pub entry: String,
    pub local_work_size: usize,
    pub global_work_size: usize,
}

/// Kernels solving one descriptor. The primary kernel is last; with two
/// kernels the first one scales `c` by beta.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Solution {
    pub kernels: Vec<SolutionKernel>,
}

impl Solution {
    pub fn primary(&self) -> Option<&SolutionKernel> {
        self.kernels.last()
    }

    pub fn beta(&self) -> Option<&SolutionKernel> {
        if self.kernels.len() == 2 {
            self.kernels.first()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Produces kernels for a [`SolverGeometry`].
pub trait GemmSolver: Send + Sync {
    /// Whether [`GemmSolver::search`] does a real device search.
    fn supports_search(&self) -> bool {
        false
    }

    fn search(&self, request: &SearchRequest<'_>) -> Result<Solution, GemmError> {
        Ok(self.default_solution(request.geometry))
    }

    /// A solution that needs no device access. Must be deterministic.
    fn default_solution(&self, geometry: &SolverGeometry) -> Solution;
}

/// Naive HIP GEMM kernels, one thread per element of `C`.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSolver {
    split_k_threshold: usize,
}

impl Default for DefaultSolver {
    fn default() -> Self {
        Self {
            split_k_threshold: SPLIT_K_THRESHOLD,
        }
    }
}

impl DefaultSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split_k_threshold(mut self, threshold: usize) -> Self {
        self.split_k_threshold = threshold;
        self
    }

    fn launch_sizes(elements: usize) -> (usize, usize) {
        let global = elements.div_ceil(DEFAULT_LOCAL_WORK_SIZE).max(1) * DEFAULT_LOCAL_WORK_SIZE;
        (DEFAULT_LOCAL_WORK_SIZE, global)
    }
}

impl GemmSolver for DefaultSolver {
    fn default_solution(&self, geometry: &SolverGeometry) -> Solution {
        let g = column_major(geometry);
        let (local, global) = Self::launch_sizes(g.m * g.n);

        if g.k < self.split_k_threshold {
            return Solution {
                kernels: vec![SolutionKernel {
                    source: KernelSource::inline(gemm_source(&g, KernelVariant::AlphaBeta)),
                    entry: KernelVariant::AlphaBeta.entry().to_string(),
                    local_work_size: local,
                    global_work_size: global,
                }],
            };
        }

        Solution {
            kernels: vec![
                SolutionKernel {
                    source: KernelSource::inline(beta_source(&g)),
                    entry: BETA_ENTRY.to_string(),
                    local_work_size: local,
                    global_work_size: global,
                },
                SolutionKernel {
                    source: KernelSource::inline(gemm_source(&g, KernelVariant::Accumulate)),
                    entry: KernelVariant::Accumulate.entry().to_string(),
                    local_work_size: local,
                    global_work_size: global,
                },
            ],
        }
    }
}

/// Rewrite a row-major descriptor as the equivalent column-major one.
fn column_major(geometry: &SolverGeometry) -> SolverGeometry {
    if geometry.col_major {
        return *geometry;
    }
    SolverGeometry {
        col_major: true,
        t_a: geometry.t_b,
        t_b: geometry.t_a,
        lda: geometry.ldb,
        ldb: geometry.lda,
        m: geometry.n,
        n: geometry.m,
        ..*geometry
    }
}

const BETA_ENTRY: &str = "kore_gemm_beta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KernelVariant {
    /// `C = alpha * op(A) op(B) + beta * C`
    AlphaBeta,
    /// `C += alpha * op(A) op(B)`
    Accumulate,
}

impl KernelVariant {
    fn entry(&self) -> &'static str {
        match self {
            KernelVariant::AlphaBeta => "kore_gemm_ab",
            KernelVariant::Accumulate => "kore_gemm_acc",
        }
    }
}

fn scalar_type(precision: Precision) -> &'static str {
    match precision {
        Precision::Single => "float",
        Precision::Double => "double",
    }
}

fn write_defines(out: &mut String, g: &SolverGeometry) {
    let _ = writeln!(out, "#define KORE_M {}u", g.m);
    let _ = writeln!(out, "#define KORE_N {}u", g.n);
    let _ = writeln!(out, "#define KORE_K {}u", g.k);
    let _ = writeln!(out, "#define KORE_LDA {}u", g.lda);
    let _ = writeln!(out, "#define KORE_LDB {}u", g.ldb);
    let _ = writeln!(out, "#define KORE_LDC {}u", g.ldc);
    let a_index = if g.t_a {
        "((p) + (i) * KORE_LDA)"
    } else {
        "((i) + (p) * KORE_LDA)"
    };
    let b_index = if g.t_b {
        "((j) + (p) * KORE_LDB)"
    } else {
        "((p) + (j) * KORE_LDB)"
    };
    let c_index = if g.t_c {
        "((j) + (i) * KORE_LDC)"
    } else {
        "((i) + (j) * KORE_LDC)"
    };
    let _ = writeln!(out, "#define KORE_A(i, p) a[{a_index}]");
    let _ = writeln!(out, "#define KORE_B(p, j) b[{b_index}]");
    let _ = writeln!(out, "#define KORE_C(i, j) c[{c_index}]");
    let _ = writeln!(out, "typedef {} kore_t;", scalar_type(g.precision));
}

fn gemm_source(g: &SolverGeometry, variant: KernelVariant) -> String {
    let mut out = String::new();
    write_defines(&mut out, g);
    let beta_param = match variant {
        KernelVariant::AlphaBeta => ", float beta",
        KernelVariant::Accumulate => "",
    };
    let store = match variant {
        KernelVariant::AlphaBeta => {
            "KORE_C(i, j) = (kore_t)alpha * acc + (kore_t)beta * KORE_C(i, j);"
        }
        KernelVariant::Accumulate => "KORE_C(i, j) += (kore_t)alpha * acc;",
    };
    let _ = write!(
        out,
        r#"
extern "C" __global__ void {entry}(const kore_t* a, unsigned int a_offset,
                                   const kore_t* b, unsigned int b_offset,
                                   kore_t* c, unsigned int c_offset,
                                   float alpha{beta_param}) {{
    unsigned int gid = blockIdx.x * blockDim.x + threadIdx.x;
    if (gid >= KORE_M * KORE_N) return;
    unsigned int i = gid % KORE_M;
    unsigned int j = gid / KORE_M;
    a += a_offset;
    b += b_offset;
    c += c_offset;
    kore_t acc = 0;
    for (unsigned int p = 0; p < KORE_K; ++p) {{
        acc += KORE_A(i, p) * KORE_B(p, j);
    }}
    {store}
}}
"#,
        entry = variant.entry(),
    );
    out
}

fn beta_source(g: &SolverGeometry) -> String {
    let mut out = String::new();
    write_defines(&mut out, g);
    let _ = write!(
        out,
        r#"
extern "C" __global__ void {BETA_ENTRY}(kore_t* c, unsigned int c_offset, float beta) {{
    unsigned int gid = blockIdx.x * blockDim.x + threadIdx.x;
    if (gid >= KORE_M * KORE_N) return;
    unsigned int i = gid % KORE_M;
    unsigned int j = gid / KORE_M;
    c += c_offset;
    KORE_C(i, j) *= (kore_t)beta;
}}
"#
    );
    out
}
