//! Capabilities consumed from a finite element backend.
//!
//! The stochastic Galerkin machinery never looks inside a mesh or a basis. Everything it needs
//! is expressed by the two traits in this module: [`FunctionSpace`] describes a discrete space
//! on one mesh together with the transfer operations between spaces, and [`FemDiscretisation`]
//! provides assembly, boundary conditions and the local quantities required by the estimator.
use crate::quadrature::QuadratureSettings;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a mesh for the lifetime of the process.
///
/// Clones of a mesh share its id, while every refinement produces a mesh with a fresh id.
/// Caches keyed by mesh ids therefore never return data computed for a mesh that has since
/// been refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(u64);

impl MeshId {
    pub fn fresh() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A discrete function space on a single mesh.
pub trait FunctionSpace: Clone + Debug {
    type Mesh: Clone + Debug;

    fn mesh(&self) -> &Self::Mesh;

    fn mesh_id(&self) -> MeshId;

    /// Number of degrees of freedom.
    fn dim(&self) -> usize;

    fn num_cells(&self) -> usize;

    /// Largest cell diameter.
    fn hmax(&self) -> f64;

    /// Interpolate the function with coefficients `coeffs` in `source` into `self`.
    fn interpolate(&self, source: &Self, coeffs: &DVector<f64>) -> DVector<f64>;

    /// Transfer a dual vector from `fine` to `self`.
    ///
    /// This is the transpose of [`interpolate`](Self::interpolate) from `self` into `fine`, so
    /// that `restrict(fine, A * interpolate(...))` is the Galerkin projection of `A`.
    fn restrict(&self, fine: &Self, dual: &DVector<f64>) -> DVector<f64>;

    /// Refine the marked cells (and whatever closure the mesh type requires).
    fn refine(&self, marked_cells: &BTreeSet<usize>) -> eyre::Result<Self>;

    fn refine_uniformly(&self) -> eyre::Result<Self>;

    /// A space on the common refinement of the meshes of all given spaces.
    ///
    /// When all spaces share one mesh, the returned space lives on that same mesh.
    fn joint(spaces: &[&Self]) -> eyre::Result<Self>;

    /// Accumulate per-cell values given on `source` onto the cells of `self`.
    fn accumulate_cell_values(&self, source: &Self, values: &DVector<f64>) -> DVector<f64>;

    /// Move `self` onto the mesh of `other`, adopting its id.
    ///
    /// Fails unless both meshes are geometrically identical.
    fn share_mesh(&mut self, other: &Self) -> eyre::Result<()>;
}

/// How Dirichlet degrees of freedom are treated when assembling an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirichletTreatment {
    /// Assemble the operator without boundary conditions.
    None,
    /// Replace Dirichlet rows and columns by the identity.
    Eliminate,
    /// Zero out Dirichlet rows and columns.
    InnerDofs,
}

/// An operator that solves a deterministic linear system, e.g. a factorized mean operator.
pub trait SolveOperator: Debug {
    fn solve(&self, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>>;
}

/// Data needed to evaluate the residual of one stochastic mode.
///
/// The flux of the mode is $\sigma = \sum_k a_k \nabla v_k$, where the pairs $(a_k, v_k)$ are
/// given by `terms`. All coefficient vectors are expressed in the space the residual is
/// evaluated on.
#[derive(Debug)]
pub struct ResidualInput<'a, F> {
    pub terms: Vec<(&'a F, DVector<f64>)>,
    /// Volume load, present only for the zero multi-index.
    pub source: Option<&'a F>,
    /// Whether Neumann data enters the boundary residual (only for the zero multi-index).
    pub with_neumann_bc: bool,
    pub quadrature: QuadratureSettings,
}

/// A finite element discretisation of a linear elliptic PDE.
pub trait FemDiscretisation: Debug {
    type Mesh: Clone + Debug;
    type Space: FunctionSpace<Mesh = Self::Mesh>;
    type Function: Debug;

    fn function_space(&self, mesh: &Self::Mesh, degree: usize) -> eyre::Result<Self::Space>;

    /// The volume load, if any.
    fn source(&self) -> Option<&Self::Function>;

    fn dirichlet_dofs(&self, space: &Self::Space) -> Vec<usize>;

    fn assemble_operator(
        &self,
        space: &Self::Space,
        coeff: &Self::Function,
        treatment: DirichletTreatment,
    ) -> eyre::Result<CsrMatrix<f64>>;

    /// A solver for the operator with Dirichlet conditions eliminated.
    fn assemble_solve_operator(
        &self,
        space: &Self::Space,
        coeff: &Self::Function,
    ) -> eyre::Result<Box<dyn SolveOperator>>;

    /// Assemble a right-hand side.
    ///
    /// With `with_dirichlet_bc`, Dirichlet rows hold the boundary values and the remaining rows
    /// are corrected by the lifting of the boundary values through `coeff`. A missing `f`
    /// denotes zero loading.
    fn assemble_rhs(
        &self,
        space: &Self::Space,
        coeff: &Self::Function,
        with_dirichlet_bc: bool,
        with_neumann_bc: bool,
        f: Option<&Self::Function>,
    ) -> eyre::Result<DVector<f64>>;

    /// Overwrite Dirichlet entries with boundary values, or with zeros if `homogeneous`.
    fn set_dirichlet_bc_entries(&self, space: &Self::Space, v: &mut DVector<f64>, homogeneous: bool);

    /// Squared residual indicators, one per cell, weighted by the inverse of `a0`.
    fn residual_indicators(
        &self,
        space: &Self::Space,
        a0: &Self::Function,
        input: &ResidualInput<Self::Function>,
    ) -> eyre::Result<DVector<f64>>;

    /// Per-cell values of $\int_T a |\nabla v|^2$.
    fn energy_norm_squared(
        &self,
        space: &Self::Space,
        v: &DVector<f64>,
        coeff: &Self::Function,
        quadrature: QuadratureSettings,
    ) -> eyre::Result<DVector<f64>>;

    /// Approximation of $\| a_m / a_0 \|_\infty$ sampled with resolution `maxh`.
    fn coefficient_sup_ratio(&self, a_m: &Self::Function, a0: &Self::Function, maxh: f64) -> f64;

    /// The $L^2$ norm and $H^1$ seminorm of a discrete function.
    fn norms(&self, space: &Self::Space, v: &DVector<f64>) -> (f64, f64);
}
