//! Linear operators, including the stochastic Galerkin operator on multi-vectors.
use crate::coefficient_field::CoefficientField;
use crate::multiindex::MultiIndex;
use crate::multi_vector::{get_projection, Component, MultiVector, ProjectionCache};
use crate::space::{DirichletTreatment, FemDiscretisation, FunctionSpace, MeshId, SolveOperator};
use eyre::eyre;
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::marker::PhantomData;
use std::sync::Arc;

/// A linear map $V \to V$.
pub trait LinearOperator<V> {
    fn apply(&self, x: &V) -> eyre::Result<V>;
}

impl<'a, V, A> LinearOperator<V> for &'a A
where
    A: ?Sized + LinearOperator<V>,
{
    fn apply(&self, x: &V) -> eyre::Result<V> {
        <A as LinearOperator<V>>::apply(self, x)
    }
}

impl LinearOperator<DVector<f64>> for DMatrix<f64> {
    fn apply(&self, x: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        if self.ncols() != x.len() {
            return Err(eyre!("dimension mismatch: {} columns, vector of length {}", self.ncols(), x.len()));
        }
        Ok(self * x)
    }
}

impl LinearOperator<DVector<f64>> for CsrMatrix<f64> {
    fn apply(&self, x: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        if self.ncols() != x.len() {
            return Err(eyre!("dimension mismatch: {} columns, vector of length {}", self.ncols(), x.len()));
        }
        Ok(self * x)
    }
}

pub struct IdentityOperator;

impl<V: Clone> LinearOperator<V> for IdentityOperator {
    fn apply(&self, x: &V) -> eyre::Result<V> {
        Ok(x.clone())
    }
}

/// Determines the mesh on which the deterministic operators of each mode are assembled.
///
/// Regardless of the choice, all operators are assembled once on the component's own mesh
/// when every active component lives on the same mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssemblyType {
    /// Assemble on the mesh of $w_\mu$ and interpolate neighbours onto it.
    Mu,
    /// Assemble on the joint mesh of $w_\mu$ and its active neighbours $w_{\mu \pm e_m}$.
    JointMu,
    /// Assemble on the joint mesh of all active components.
    JointGlobal,
}

impl Default for AssemblyType {
    fn default() -> Self {
        Self::JointMu
    }
}

/// Deterministic operator matrices assembled during one operator application.
///
/// `None` denotes the mean coefficient, `Some(m)` the coefficient $a_m$.
#[derive(Debug, Default)]
struct AssemblyCache {
    matrices: FxHashMap<(MeshId, Option<usize>), CsrMatrix<f64>>,
}

impl AssemblyCache {
    fn get_or_assemble<D: FemDiscretisation>(
        &mut self,
        pde: &D,
        space: &D::Space,
        term: Option<usize>,
        coeff: &D::Function,
    ) -> eyre::Result<&CsrMatrix<f64>> {
        match self.matrices.entry((space.mesh_id(), term)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let matrix = pde.assemble_operator(space, coeff, DirichletTreatment::InnerDofs)?;
                Ok(entry.insert(matrix))
            }
        }
    }
}

/// The stochastic Galerkin operator.
///
/// For every active multi-index $\mu$ the result is
///
/// $$ (A w)_\mu = A_0 w_\mu + \sum_{m} A_m \left( -\beta^m_{0} w_\mu + \beta^m_{+} w_{\mu + e_m}
///      + \beta^m_{-} w_{\mu - e_m} \right), $$
///
/// where the $\beta$ coefficients are given by [`crate::polynomials::PolynomialFamily::get_beta`]
/// at degree $\mu_m$ and neighbours outside the active set are omitted. Dirichlet degrees of
/// freedom are mapped by the identity.
#[derive(Debug)]
pub struct MultiOperator<D: FemDiscretisation> {
    coeff_field: Arc<CoefficientField<D::Function>>,
    pde: Arc<D>,
    assembly_type: AssemblyType,
}

impl<D: FemDiscretisation> MultiOperator<D> {
    pub fn new(coeff_field: Arc<CoefficientField<D::Function>>, pde: Arc<D>, assembly_type: AssemblyType) -> Self {
        Self {
            coeff_field,
            pde,
            assembly_type,
        }
    }

    pub fn coeff_field(&self) -> &CoefficientField<D::Function> {
        &self.coeff_field
    }

    pub fn pde(&self) -> &D {
        &self.pde
    }

    pub fn assembly_type(&self) -> AssemblyType {
        self.assembly_type
    }

    /// Active neighbours $\mu \pm e_m$ of `mu` for `m < maxm`.
    fn active_neighbours(w: &MultiVector<D::Space>, mu: &MultiIndex, maxm: usize) -> Vec<MultiIndex> {
        let mut neighbours = Vec::new();
        for m in 0..maxm {
            let up = mu.increment(m);
            if w.contains(&up) {
                neighbours.push(up);
            }
            if let Ok(down) = mu.decrement(m) {
                if w.contains(&down) {
                    neighbours.push(down);
                }
            }
        }
        neighbours
    }

    /// A copy of `w` with homogeneous Dirichlet entries.
    fn homogeneous(&self, w: &MultiVector<D::Space>) -> MultiVector<D::Space> {
        let mut w0 = w.clone();
        for mu in w.active_indices() {
            if let Some(component) = w0.get_mut(&mu) {
                self.pde
                    .set_dirichlet_bc_entries(&component.space, &mut component.coeffs, true);
            }
        }
        w0
    }
}

impl<D: FemDiscretisation> LinearOperator<MultiVector<D::Space>> for MultiOperator<D> {
    fn apply(&self, w: &MultiVector<D::Space>) -> eyre::Result<MultiVector<D::Space>> {
        let maxm = self.coeff_field.truncate_dimensions(w.max_order());
        let shared_mesh = w.has_shared_mesh();
        let w0 = self.homogeneous(w);

        let mut assembly = AssemblyCache::default();
        let mut projections = ProjectionCache::new();

        let global_space = match self.assembly_type {
            AssemblyType::JointGlobal if !shared_mesh => {
                let spaces: Vec<_> = w.iter().map(|(_, c)| &c.space).collect();
                Some(D::Space::joint(&spaces)?)
            }
            _ => None,
        };

        let mut result = MultiVector::new();
        for (mu, component) in w.iter() {
            let target = &component.space;
            let work_space = match (&global_space, self.assembly_type) {
                _ if shared_mesh => target.clone(),
                (Some(global), _) => global.clone(),
                (None, AssemblyType::JointMu) => {
                    let neighbours = Self::active_neighbours(w, mu, maxm);
                    let mut spaces = vec![target];
                    spaces.extend(neighbours.iter().map(|nu| &w[nu].space));
                    D::Space::joint(&spaces)?
                }
                (None, _) => target.clone(),
            };

            let x_mu = get_projection(&w0, mu, &work_space, &mut projections);
            let a0 = assembly.get_or_assemble(self.pde.as_ref(), &work_space, None, self.coeff_field.mean_func())?;
            let mut y = a0 * &x_mu;

            for m in 0..maxm {
                let (a_m, rv) = &self.coeff_field[m];
                let beta = rv.orth_polys().get_beta(mu.degree(m));
                let mut z = &x_mu * (-beta.center);
                let up = mu.increment(m);
                if w.contains(&up) {
                    let x_up = get_projection(&w0, &up, &work_space, &mut projections);
                    z.axpy(beta.next, &x_up, 1.0);
                }
                if let Ok(down) = mu.decrement(m) {
                    if w.contains(&down) {
                        let x_down = get_projection(&w0, &down, &work_space, &mut projections);
                        z.axpy(beta.previous, &x_down, 1.0);
                    }
                }
                let a_m = assembly.get_or_assemble(self.pde.as_ref(), &work_space, Some(m), a_m)?;
                y += a_m * &z;
            }

            let mut v = if work_space.mesh_id() == target.mesh_id() {
                y
            } else {
                target.restrict(&work_space, &y)
            };
            self.pde.set_dirichlet_bc_entries(target, &mut v, true);
            for i in self.pde.dirichlet_dofs(target) {
                v[i] = component.coeffs[i];
            }
            result.insert(mu.clone(), Component::new(target.clone(), v));
        }

        let (hits, misses) = projections.statistics();
        debug!(
            "applied stochastic Galerkin operator to {} components ({} matrices, projection cache {} hits / {} misses)",
            w.len(),
            assembly.matrices.len(),
            hits,
            misses
        );
        Ok(result)
    }
}

/// Block-diagonal preconditioner applying the inverse mean operator to every component.
#[derive(Debug)]
pub struct PreconditioningOperator<S> {
    solvers: FxHashMap<MeshId, Box<dyn SolveOperator>>,
    marker: PhantomData<fn(S)>,
}

impl<S: FunctionSpace> PreconditioningOperator<S> {
    /// Factorize the mean operator on every mesh occurring in `w`.
    pub fn new<D>(pde: &D, mean: &D::Function, w: &MultiVector<S>) -> eyre::Result<Self>
    where
        D: FemDiscretisation<Space = S>,
    {
        let mut solvers = FxHashMap::default();
        for (_, component) in w.iter() {
            if let Entry::Vacant(entry) = solvers.entry(component.space.mesh_id()) {
                entry.insert(pde.assemble_solve_operator(&component.space, mean)?);
            }
        }
        Ok(Self {
            solvers,
            marker: PhantomData,
        })
    }
}

impl<S: FunctionSpace> LinearOperator<MultiVector<S>> for PreconditioningOperator<S> {
    fn apply(&self, w: &MultiVector<S>) -> eyre::Result<MultiVector<S>> {
        let mut result = MultiVector::new();
        for (mu, component) in w.iter() {
            let solver = self
                .solvers
                .get(&component.space.mesh_id())
                .ok_or_else(|| eyre!("no mean operator factorized for the mesh of component {}", mu))?;
            let v = solver.solve(&component.coeffs)?;
            result.insert(mu.clone(), Component::new(component.space.clone(), v));
        }
        Ok(result)
    }
}
