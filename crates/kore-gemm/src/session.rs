//! A runtime handle bundled with its geometry registry and solver.

use kore_runtime::Handle;

use crate::derive::{derive_geometry, GemmProblem};
use crate::error::GemmError;
use crate::geometry::{DataLayout, GemmAlgorithm, GemmGeometry, GemmOperands};
use crate::registry::{GeometryRegistry, SearchBuffers};
use crate::solver::{DefaultSolver, GemmSolver, SearchOptions};

pub struct GemmSession {
    handle: Handle,
    registry: GeometryRegistry,
    solver: Box<dyn GemmSolver>,
    options: SearchOptions,
}

impl GemmSession {
    /// Session using [`DefaultSolver`] and default search options.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            registry: GeometryRegistry::new(),
            solver: Box::new(DefaultSolver::new()),
            options: SearchOptions::default(),
        }
    }

    pub fn with_solver(mut self, solver: impl GemmSolver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn registry(&self) -> &GeometryRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn resolve(
        &self,
        geometry: GemmGeometry,
        buffers: SearchBuffers,
    ) -> Result<GemmGeometry, GemmError> {
        self.registry.resolve(
            &self.handle,
            self.solver.as_ref(),
            geometry,
            buffers,
            &self.options,
        )
    }

    /// Derive the geometry for `problem` and make sure it is resolved.
    /// Returns the resolved record and its network configuration.
    pub fn prepare(
        &self,
        problem: GemmProblem<'_>,
        layout: DataLayout,
        buffers: SearchBuffers,
    ) -> Result<(GemmGeometry, String), GemmError> {
        let (geometry, network_config) = derive_geometry(problem, layout);
        let resolved = self.resolve(geometry, buffers)?;
        Ok((resolved, network_config))
    }

    pub fn get(
        &self,
        algorithm: GemmAlgorithm,
        network_config: &str,
    ) -> Result<GemmGeometry, GemmError> {
        self.registry.get(algorithm, network_config)
    }

    pub fn run(
        &self,
        algorithm: GemmAlgorithm,
        network_config: &str,
        operands: &GemmOperands,
    ) -> Result<(), GemmError> {
        self.registry
            .run(&self.handle, algorithm, network_config, operands)
    }
}

impl std::fmt::Debug for GemmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemmSession")
            .field("handle", &self.handle)
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish()
    }
}
