//! # kore-gemm
//!
//! GEMM-backed convolution plumbing on top of [`kore_runtime`]:
//!
//! - [`derive`]: convolution tensors to a GEMM [`GemmGeometry`] and its
//!   network configuration string
//! - [`GeometryRegistry`]: resolves a geometry to built kernels once per
//!   key, then launches them on every call
//! - [`GemmSolver`]: where kernels come from; [`DefaultSolver`] needs no
//!   device search
//!
//! ```no_run
//! # fn demo(handle: kore_runtime::Handle) -> kore_gemm::Result<()> {
//! use kore_gemm::{DataLayout, GemmOperands, GemmProblem, GemmSession, SearchBuffers, TensorShape};
//!
//! let session = GemmSession::new(handle);
//! let x = TensorShape::new(&[8, 3, 32, 32]);
//! let w = TensorShape::new(&[16, 3, 5, 5]);
//! let y = TensorShape::new(&[8, 16, 28, 28]);
//! let (geometry, config) = session.prepare(
//!     GemmProblem::ConvFwd { x: &x, w: &w, y: &y },
//!     DataLayout::RowMajor,
//!     SearchBuffers::default(),
//! )?;
//! session.run(geometry.algorithm, &config, &GemmOperands::default())?;
//! # Ok(())
//! # }
//! ```

pub mod derive;
pub mod error;
pub mod geometry;
pub mod registry;
pub mod session;
pub mod solver;
pub mod tensor;

pub use derive::{derive_geometry, GemmProblem, GemmShape};
pub use error::GemmError;
pub use geometry::{
    DataLayout, GemmAlgorithm, GemmGeometry, GemmOperands, GeometryKey, Precision, SolverGeometry,
};
pub use registry::{GeometryRegistry, SearchBuffers};
pub use session::GemmSession;
pub use solver::{
    DefaultSolver, GemmSolver, SearchOptions, SearchRequest, Solution, SolutionKernel,
    DEFAULT_LOCAL_WORK_SIZE, SPLIT_K_THRESHOLD,
};
pub use tensor::{tie4, TensorDesc, TensorShape};

pub type Result<T> = std::result::Result<T, GemmError>;
