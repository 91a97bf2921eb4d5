//! Resolution and launch behavior of the geometry registry against a
//! recording runtime.

use std::sync::Arc;
use std::thread;

use kore_gemm::derive::{conv_bwd_weights, conv_fwd, gemm};
use kore_gemm::{
    DataLayout, DefaultSolver, GemmAlgorithm, GemmError, GemmGeometry, GemmOperands, GemmProblem,
    GemmSession, GemmShape, GemmSolver, GeometryRegistry, SearchBuffers, SearchOptions,
    SearchRequest, Solution, SolverGeometry, TensorShape,
};
use kore_runtime::testing::{RecordedArg, RecordingRuntime};
use kore_runtime::{DevicePtr, DeviceRuntime, Handle, RuntimeConfig, RuntimeError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn session() -> (Arc<RecordingRuntime>, Handle) {
    init_tracing();
    let recording = Arc::new(RecordingRuntime::default());
    let runtime: Arc<dyn DeviceRuntime> = recording.clone();
    (recording, Handle::new(runtime, RuntimeConfig::default()))
}

fn conv_shapes() -> (TensorShape, TensorShape, TensorShape) {
    (
        TensorShape::new(&[8, 3, 32, 32]),
        TensorShape::new(&[16, 3, 5, 5]),
        TensorShape::new(&[8, 16, 28, 28]),
    )
}

fn operands() -> GemmOperands {
    GemmOperands::new(DevicePtr(0xa000), DevicePtr(0xb000), DevicePtr(0xc000))
        .with_offsets(1, 2, 3)
}

/// A geometry whose default solution has two kernels.
fn split_geometry(beta: f32) -> GemmGeometry {
    let shape = GemmShape {
        m: 32,
        n: 32,
        k: 2048,
        lda: 32,
        ldb: 2048,
        ldc: 32,
        t_a: false,
        t_b: false,
    };
    gemm(shape, DataLayout::ColumnMajor, 1.5, beta)
}

fn resolve(handle: &Handle, registry: &GeometryRegistry, geometry: GemmGeometry) -> GemmGeometry {
    registry
        .resolve(
            handle,
            &DefaultSolver::new(),
            geometry,
            SearchBuffers::default(),
            &SearchOptions::default(),
        )
        .unwrap()
}

#[test]
fn test_conv_fwd_end_to_end() {
    let (rt, handle) = session();
    let session = GemmSession::new(handle);
    let (x, w, y) = conv_shapes();

    let (geometry, config) = session
        .prepare(
            GemmProblem::ConvFwd {
                x: &x,
                w: &w,
                y: &y,
            },
            DataLayout::RowMajor,
            SearchBuffers::default(),
        )
        .unwrap();
    assert_eq!((geometry.m(), geometry.n(), geometry.k()), (16, 784, 75));
    assert_eq!(geometry.ldc(), 784);

    session
        .run(GemmAlgorithm::ConvFwd, &config, &operands())
        .unwrap();
    let launches = rt.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kernel, "kore_gemm_ab");
    // a, a_off, b, b_off, c, c_off, alpha, beta
    assert_eq!(launches[0].args.len(), 8);
    assert_eq!(launches[0].args[6].as_f32(), Some(1.0));
    assert_eq!(launches[0].args[7].as_f32(), Some(0.0));
    assert_eq!(launches[0].local.as_slice(), &[256, 1, 1]);
}

#[test]
fn test_resolve_is_idempotent() {
    let (rt, handle) = session();
    let registry = GeometryRegistry::new();
    let (x, w, y) = conv_shapes();

    let first = resolve(&handle, &registry, conv_fwd(&x, &w, &y, DataLayout::RowMajor));
    let second = resolve(&handle, &registry, conv_fwd(&x, &w, &y, DataLayout::RowMajor));
    assert_eq!(first, second);
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry
            .get(GemmAlgorithm::ConvFwd, &first.network_config())
            .unwrap(),
        first
    );
    assert_eq!(rt.builds().len(), 1);
}

#[test]
fn test_keys_are_distinct_per_algorithm() {
    let (_rt, handle) = session();
    let registry = GeometryRegistry::new();

    let fwd = split_geometry(0.0);
    let mut other = fwd.clone();
    other.algorithm = GemmAlgorithm::ConvBwdData;
    other.alpha = 4.0;
    assert_eq!(fwd.network_config(), other.network_config());

    resolve(&handle, &registry, fwd.clone());
    let config = fwd.network_config();
    assert!(registry.get(GemmAlgorithm::ConvBwdData, &config).is_err());

    resolve(&handle, &registry, other);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get(GemmAlgorithm::Gemm, &config).unwrap().alpha, 1.5);
    assert_eq!(
        registry.get(GemmAlgorithm::ConvBwdData, &config).unwrap().alpha,
        4.0
    );
}

#[test]
fn test_run_unresolved_is_not_found() {
    let (rt, handle) = session();
    let registry = GeometryRegistry::new();
    let err = registry
        .run(&handle, GemmAlgorithm::ConvFwd, "tC0_tA0", &operands())
        .unwrap_err();
    assert!(matches!(err, GemmError::NotFound { .. }));
    assert!(rt.launches().is_empty());
}

#[test]
fn test_beta_kernel_runs_first() {
    let (rt, handle) = session();
    let registry = GeometryRegistry::new();
    let g = resolve(&handle, &registry, split_geometry(0.25));
    assert!(g.beta_kernel_returned());
    assert!(g.beta_kernel_required());

    registry
        .run(&handle, GemmAlgorithm::Gemm, &g.network_config(), &operands())
        .unwrap();
    let launches = rt.launches();
    assert_eq!(launches.len(), 2);

    assert_eq!(launches[0].kernel, "kore_gemm_beta");
    assert_eq!(
        launches[0].args,
        vec![
            RecordedArg::Value(0xc000u64.to_ne_bytes().to_vec()),
            RecordedArg::Value(3u32.to_ne_bytes().to_vec()),
            RecordedArg::Value(0.25f32.to_ne_bytes().to_vec()),
        ]
    );

    assert_eq!(launches[1].kernel, "kore_gemm_acc");
    let args = &launches[1].args;
    assert_eq!(args.len(), 7);
    assert_eq!(args[0].as_u64(), Some(0xa000));
    assert_eq!(args[1].as_u32(), Some(1));
    assert_eq!(args[2].as_u64(), Some(0xb000));
    assert_eq!(args[3].as_u32(), Some(2));
    assert_eq!(args[4].as_u64(), Some(0xc000));
    assert_eq!(args[5].as_u32(), Some(3));
    assert_eq!(args[6].as_f32(), Some(1.5));
}

#[test]
fn test_beta_one_runs_alpha_only() {
    let (rt, handle) = session();
    let registry = GeometryRegistry::new();
    let g = resolve(&handle, &registry, split_geometry(1.0));
    assert!(g.beta_kernel_returned());
    assert!(!g.beta_kernel_required());
    assert!(!handle.has_kernel("kore_gemm_beta", &g.network_config()));

    g.run(&handle, &operands()).unwrap();
    let launches = rt.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kernel, "kore_gemm_acc");
    assert_eq!(launches[0].args.len(), 7);
}

#[test]
fn test_beta_close_to_one_still_needs_beta_kernel() {
    let (_rt, handle) = session();
    let registry = GeometryRegistry::new();
    let g = resolve(&handle, &registry, split_geometry(1.0 - f32::EPSILON));
    assert!(g.beta_kernel_required());
}

#[test]
fn test_reresolve_under_single_kernel_solver_clears_beta_flags() {
    let (_rt, handle) = session();
    let split = GeometryRegistry::new();
    let g = resolve(&handle, &split, split_geometry(0.5));
    assert!(g.beta_kernel_returned());
    assert!(g.beta_kernel_required());

    let (rt2, handle2) = session();
    let single = GeometryRegistry::new();
    let again = single
        .resolve(
            &handle2,
            &DefaultSolver::new().with_split_k_threshold(usize::MAX),
            g,
            SearchBuffers::default(),
            &SearchOptions::default(),
        )
        .unwrap();
    assert!(!again.beta_kernel_returned());
    assert!(!again.beta_kernel_required());

    single
        .run(&handle2, GemmAlgorithm::Gemm, &again.network_config(), &operands())
        .unwrap();
    let launches = rt2.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].kernel, "kore_gemm_ab");
    assert_eq!(launches[0].args.len(), 8);
    assert_eq!(launches[0].args[7].as_f32(), Some(0.5));
}

#[test]
fn test_failed_beta_build_registers_nothing() {
    let (rt, handle) = session();
    rt.fail_builds_containing("kore_gemm_beta(", -11, "error: unknown type name");
    let registry = GeometryRegistry::new();
    let g = split_geometry(0.0);
    let config = g.network_config();

    let err = registry
        .resolve(
            &handle,
            &DefaultSolver::new(),
            g,
            SearchBuffers::default(),
            &SearchOptions::default(),
        )
        .unwrap_err();
    match err {
        GemmError::Runtime(RuntimeError::Build { status, log }) => {
            assert_eq!(status, -11);
            assert!(log.contains("unknown type name"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!registry.contains(GemmAlgorithm::Gemm, &config));
    assert!(registry.is_empty());
}

#[test]
fn test_bwd_weights_accumulates() {
    let (_rt, handle) = session();
    let session = GemmSession::new(handle);
    let (x, dw, dy) = conv_shapes();
    let (g, _) = session
        .prepare(
            GemmProblem::ConvBwdWeights {
                dy: &dy,
                x: &x,
                dw: &dw,
            },
            DataLayout::RowMajor,
            SearchBuffers::default(),
        )
        .unwrap();
    assert_eq!(g.beta, 1.0);
    assert_eq!(g, conv_bwd_weights(&dy, &x, &dw, DataLayout::RowMajor));
}

#[test]
fn test_concurrent_first_resolution_builds_once() {
    let (rt, handle) = session();
    let registry = GeometryRegistry::new();
    let geometry = split_geometry(0.5);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| resolve(&handle, &registry, geometry.clone()));
        }
    });
    assert_eq!(registry.len(), 1);
    // One primary and one beta program.
    assert_eq!(rt.builds().len(), 2);
    assert_eq!(rt.created_kernels().len(), 2);
}

/// A solver that only ever searches, recording what it was asked.
struct SearchingSolver {
    seen: parking_lot::Mutex<Vec<(SolverGeometry, DevicePtr, SearchOptions)>>,
}

impl GemmSolver for SearchingSolver {
    fn supports_search(&self) -> bool {
        true
    }

    fn search(&self, request: &SearchRequest<'_>) -> Result<Solution, GemmError> {
        self.seen
            .lock()
            .push((*request.geometry, request.c, request.options.clone()));
        Ok(DefaultSolver::new().default_solution(request.geometry))
    }

    fn default_solution(&self, _geometry: &SolverGeometry) -> Solution {
        Solution::default()
    }
}

#[test]
fn test_search_is_preferred_when_supported() {
    let (_rt, handle) = session();
    let registry = GeometryRegistry::new();
    let solver = SearchingSolver {
        seen: parking_lot::Mutex::new(Vec::new()),
    };
    let options = SearchOptions {
        time_budget: std::time::Duration::from_millis(50),
        ..Default::default()
    };
    let buffers = SearchBuffers {
        c: DevicePtr(0xc0),
        ..Default::default()
    };
    let g = registry
        .resolve(&handle, &solver, split_geometry(0.0), buffers, &options)
        .unwrap();

    let seen = solver.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, g.solver);
    assert_eq!(seen[0].1, DevicePtr(0xc0));
    assert_eq!(seen[0].2.time_budget, std::time::Duration::from_millis(50));
}

#[test]
fn test_empty_solution_is_an_error() {
    struct Nothing;
    impl GemmSolver for Nothing {
        fn default_solution(&self, _geometry: &SolverGeometry) -> Solution {
            Solution::default()
        }
    }

    let (_rt, handle) = session();
    let registry = GeometryRegistry::new();
    let err = registry
        .resolve(
            &handle,
            &Nothing,
            split_geometry(0.0),
            SearchBuffers::default(),
            &SearchOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, GemmError::EmptySolution));
    assert!(registry.is_empty());
}
