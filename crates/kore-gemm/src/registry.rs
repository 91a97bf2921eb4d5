//! Process-lifetime registry of resolved GEMM geometries.
//!
//! Entries are only ever added. First-time resolution of a key is serialized
//! by a per-key gate, and an entry is inserted only after every kernel it
//! needs has been built.

use std::collections::HashMap;
use std::sync::Arc;

use kore_runtime::{DevicePtr, Handle, KernelSpec};
use parking_lot::{Mutex, RwLock};

use crate::error::GemmError;
use crate::geometry::{GemmAlgorithm, GemmGeometry, GemmOperands, GeometryKey};
use crate::solver::{GemmSolver, SearchOptions, SearchRequest, Solution, SolutionKernel};

/// Operand buffers a device search may time kernels against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchBuffers {
    pub a: DevicePtr,
    pub b: DevicePtr,
    pub c: DevicePtr,
}

#[derive(Default)]
pub struct GeometryRegistry {
    entries: RwLock<HashMap<GeometryKey, GemmGeometry>>,
    resolve_gates: Mutex<HashMap<GeometryKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for GeometryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryRegistry")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl GeometryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The geometry resolved under `(algorithm, network_config)`.
    pub fn get(
        &self,
        algorithm: GemmAlgorithm,
        network_config: &str,
    ) -> Result<GemmGeometry, GemmError> {
        self.entries
            .read()
            .get(&GeometryKey::new(algorithm, network_config))
            .cloned()
            .ok_or_else(|| GemmError::not_found(algorithm.name(), network_config))
    }

    pub fn contains(&self, algorithm: GemmAlgorithm, network_config: &str) -> bool {
        self.entries
            .read()
            .contains_key(&GeometryKey::new(algorithm, network_config))
    }

    /// Store `geometry` under its own key, replacing any previous entry.
    pub fn insert_or_replace(&self, geometry: GemmGeometry) {
        let key = geometry.key();
        self.entries.write().insert(key, geometry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Find kernels for `geometry`, build them and register the result.
    ///
    /// Returns the stored record. A key that is already registered is
    /// returned as is; concurrent first resolutions of one key build once.
    pub fn resolve(
        &self,
        handle: &Handle,
        solver: &dyn GemmSolver,
        geometry: GemmGeometry,
        buffers: SearchBuffers,
        options: &SearchOptions,
    ) -> Result<GemmGeometry, GemmError> {
        let key = geometry.key();
        if let Some(found) = self.entries.read().get(&key).cloned() {
            return Ok(found);
        }

        let gate = {
            let mut gates = self.resolve_gates.lock();
            gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _gate_lock = gate.lock();

        if let Some(found) = self.entries.read().get(&key).cloned() {
            return Ok(found);
        }

        let solution = self.find_solution(handle, solver, &geometry, buffers, options)?;
        let resolved = build_kernels(handle, geometry, &key.network_config, &solution)?;

        tracing::debug!(
            "resolved {} {}: {} kernel(s), beta kernel returned={} required={}",
            key.algorithm,
            key.network_config,
            solution.len(),
            resolved.beta_kernel_returned(),
            resolved.beta_kernel_required()
        );
        self.entries.write().insert(key.clone(), resolved.clone());
        self.resolve_gates.lock().remove(&key);
        Ok(resolved)
    }

    fn find_solution(
        &self,
        handle: &Handle,
        solver: &dyn GemmSolver,
        geometry: &GemmGeometry,
        buffers: SearchBuffers,
        options: &SearchOptions,
    ) -> Result<Solution, GemmError> {
        let solution = if solver.supports_search() {
            solver.search(&SearchRequest {
                handle,
                geometry: &geometry.solver,
                a: buffers.a,
                b: buffers.b,
                c: buffers.c,
                options,
            })?
        } else {
            tracing::debug!(
                "no device search for {}, using default solution",
                geometry.algorithm
            );
            solver.default_solution(&geometry.solver)
        };
        if solution.is_empty() {
            return Err(GemmError::EmptySolution);
        }
        Ok(solution)
    }

    /// Look up the geometry for `(algorithm, network_config)` and launch it.
    pub fn run(
        &self,
        handle: &Handle,
        algorithm: GemmAlgorithm,
        network_config: &str,
        operands: &GemmOperands,
    ) -> Result<(), GemmError> {
        self.get(algorithm, network_config)?.run(handle, operands)
    }
}

fn kernel_spec<'a>(
    kernel: &'a SolutionKernel,
    local: &'a [usize],
    global: &'a [usize],
) -> KernelSpec<'a> {
    KernelSpec {
        source: &kernel.source,
        entry: &kernel.entry,
        local,
        global,
        params: "",
    }
}

/// Build the primary kernel and, when needed, the beta kernel. Nothing is
/// registered here; a failure leaves the registry untouched.
fn build_kernels(
    handle: &Handle,
    mut geometry: GemmGeometry,
    network_config: &str,
    solution: &Solution,
) -> Result<GemmGeometry, GemmError> {
    let primary = solution.primary().ok_or(GemmError::EmptySolution)?;
    let local = [primary.local_work_size, 1, 1];
    let global = [primary.global_work_size, 1, 1];
    handle.get_kernel(
        geometry.algorithm.name(),
        network_config,
        kernel_spec(primary, &local, &global),
    )?;

    geometry.set_beta_kernel_returned(solution.len() == 2);
    geometry.enable_beta_kernel(false);

    // Exact comparison: a kernel built for beta == 1 has no beta slot.
    #[allow(clippy::float_cmp)]
    let needs_beta = geometry.beta != 1.0;
    if let Some(beta) = solution.beta().filter(|_| needs_beta) {
        let local = [beta.local_work_size, 1, 1];
        let global = [beta.global_work_size, 1, 1];
        handle.get_kernel(
            &geometry.algorithm.beta_kernel_name(),
            network_config,
            kernel_spec(beta, &local, &global),
        )?;
        geometry.enable_beta_kernel(true);
    }
    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{gemm, GemmShape};
    use crate::geometry::DataLayout;
    use crate::solver::DefaultSolver;
    use kore_runtime::testing::RecordingRuntime;
    use kore_runtime::{DeviceRuntime, RuntimeConfig};

    fn session() -> (Arc<RecordingRuntime>, Handle) {
        let recording = Arc::new(RecordingRuntime::default());
        let runtime: Arc<dyn DeviceRuntime> = recording.clone();
        (recording, Handle::new(runtime, RuntimeConfig::default()))
    }

    fn resolve_with(
        handle: &Handle,
        registry: &GeometryRegistry,
        solver: &dyn GemmSolver,
        geometry: GemmGeometry,
    ) -> GemmGeometry {
        registry
            .resolve(
                handle,
                solver,
                geometry,
                SearchBuffers::default(),
                &SearchOptions::default(),
            )
            .unwrap()
    }

    fn square(k: usize, beta: f32) -> GemmGeometry {
        let shape = GemmShape {
            m: 16,
            n: 16,
            k,
            lda: 16,
            ldb: k,
            ldc: 16,
            t_a: false,
            t_b: false,
        };
        gemm(shape, DataLayout::ColumnMajor, 1.0, beta)
    }

    #[test]
    fn test_get_unresolved_is_not_found() {
        let registry = GeometryRegistry::new();
        let err = registry.get(GemmAlgorithm::ConvFwd, "tC0").unwrap_err();
        assert!(matches!(err, GemmError::NotFound { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_insert_or_replace_overwrites() {
        let registry = GeometryRegistry::new();
        let g = square(8, 0.0);
        let config = g.network_config();
        registry.insert_or_replace(g.clone());
        registry.insert_or_replace(g.clone().with_scales(3.0, 0.0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(GemmAlgorithm::Gemm, &config).unwrap().alpha, 3.0);
    }

    #[test]
    fn test_resolve_single_kernel() {
        let (rt, handle) = session();
        let registry = GeometryRegistry::new();
        let g = registry
            .resolve(
                &handle,
                &DefaultSolver::new(),
                square(8, 0.0),
                SearchBuffers::default(),
                &SearchOptions::default(),
            )
            .unwrap();
        assert!(!g.beta_kernel_returned());
        assert!(!g.beta_kernel_required());
        assert_eq!(rt.created_kernels(), vec!["kore_gemm_ab".to_string()]);
        assert!(handle.has_kernel("kore_gemm", &g.network_config()));
    }

    #[test]
    fn test_resolve_beta_one_skips_beta_kernel() {
        let (rt, handle) = session();
        let registry = GeometryRegistry::new();
        let g = registry
            .resolve(
                &handle,
                &DefaultSolver::new().with_split_k_threshold(4),
                square(8, 1.0),
                SearchBuffers::default(),
                &SearchOptions::default(),
            )
            .unwrap();
        assert!(g.beta_kernel_returned());
        assert!(!g.beta_kernel_required());
        assert_eq!(rt.created_kernels(), vec!["kore_gemm_acc".to_string()]);
    }

    #[test]
    fn test_resolve_drops_gate_after_insert() {
        let (_rt, handle) = session();
        let registry = GeometryRegistry::new();
        resolve_with(&handle, &registry, &DefaultSolver::new(), square(8, 0.0));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve_gates.lock().is_empty());
    }

    #[test]
    fn test_resolve_failure_keeps_registry_empty() {
        let (rt, handle) = session();
        rt.fail_builds_containing("kore_gemm_ab(", -6, "error: boom");
        let registry = GeometryRegistry::new();
        let err = registry
            .resolve(
                &handle,
                &DefaultSolver::new(),
                square(8, 0.0),
                SearchBuffers::default(),
                &SearchOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, GemmError::Runtime(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_beta_flags_follow_latest_solution() {
        let (_rt, handle) = session();
        let split = GeometryRegistry::new();
        let resolved = resolve_with(
            &handle,
            &split,
            &DefaultSolver::new().with_split_k_threshold(4),
            square(8, 0.5),
        );
        assert!(resolved.beta_kernel_returned());
        assert!(resolved.beta_kernel_required());

        let (_rt2, handle2) = session();
        let single = GeometryRegistry::new();
        let again = resolve_with(
            &handle2,
            &single,
            &DefaultSolver::new().with_split_k_threshold(usize::MAX),
            resolved,
        );
        assert!(!again.beta_kernel_returned());
        assert!(!again.beta_kernel_required());
    }
}
