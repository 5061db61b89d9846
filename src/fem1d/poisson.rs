use crate::fem1d::function::Function;
use crate::fem1d::mesh::IntervalMesh;
use crate::fem1d::space::P1Space;
use crate::quadrature::QuadratureSettings;
use crate::space::{DirichletTreatment, FemDiscretisation, FunctionSpace, ResidualInput, SolveOperator};
use eyre::eyre;
use itertools::izip;
use nalgebra::DVector;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boundary condition at one end of the interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundaryCondition {
    /// Prescribed value $u = g$.
    Dirichlet(f64),
    /// Prescribed outward flux $a u' \cdot \nu = g$.
    Neumann(f64),
}

/// The diffusion problem $-(a u')' = f$ on an interval, discretised with P1 elements.
#[derive(Debug, Clone)]
pub struct Poisson1d {
    domain: (f64, f64),
    source: Option<Function>,
    left: BoundaryCondition,
    right: BoundaryCondition,
}

impl Poisson1d {
    pub fn new(
        domain: (f64, f64),
        source: Option<Function>,
        left: BoundaryCondition,
        right: BoundaryCondition,
    ) -> Self {
        Self {
            domain,
            source,
            left,
            right,
        }
    }

    /// Homogeneous Dirichlet conditions at both ends.
    pub fn homogeneous_dirichlet(domain: (f64, f64), source: Option<Function>) -> Self {
        Self::new(
            domain,
            source,
            BoundaryCondition::Dirichlet(0.0),
            BoundaryCondition::Dirichlet(0.0),
        )
    }

    pub fn domain(&self) -> (f64, f64) {
        self.domain
    }

    /// Boundary conditions with the index of the boundary dof and the outward normal.
    fn boundary(&self, space: &P1Space) -> [(usize, f64, BoundaryCondition); 2] {
        [(0, -1.0, self.left), (space.dim() - 1, 1.0, self.right)]
    }

    fn dirichlet_values(&self, space: &P1Space) -> Vec<(usize, f64)> {
        self.boundary(space)
            .iter()
            .filter_map(|&(dof, _, bc)| match bc {
                BoundaryCondition::Dirichlet(g) => Some((dof, g)),
                BoundaryCondition::Neumann(_) => None,
            })
            .collect()
    }

    fn assemble_coo(&self, space: &P1Space, coeff: &Function, treatment: DirichletTreatment) -> CooMatrix<f64> {
        let mesh = space.mesh();
        let dirichlet = self.dirichlet_dofs(space);
        let constrained = |i: usize| treatment != DirichletTreatment::None && dirichlet.contains(&i);
        let quadrature = QuadratureSettings::default();

        let mut coo = CooMatrix::new(space.dim(), space.dim());
        for cell in 0..mesh.num_cells() {
            let (x0, x1) = mesh.cell(cell);
            let h = x1 - x0;
            let k = quadrature.integrate(x0, x1, |x| coeff.value(x)) / (h * h);
            let dofs = [cell, cell + 1];
            let local = [[k, -k], [-k, k]];
            for (a, &i) in dofs.iter().enumerate() {
                for (b, &j) in dofs.iter().enumerate() {
                    if !constrained(i) && !constrained(j) {
                        coo.push(i, j, local[a][b]);
                    }
                }
            }
        }
        if treatment == DirichletTreatment::Eliminate {
            for &dof in &dirichlet {
                coo.push(dof, dof, 1.0);
            }
        }
        coo
    }
}

#[derive(Debug)]
struct CholeskySolver {
    factorization: CscCholesky<f64>,
}

impl SolveOperator for CholeskySolver {
    fn solve(&self, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        let n = self.factorization.l().nrows();
        if rhs.len() != n {
            return Err(eyre!("right-hand side of length {} for a system of size {}", rhs.len(), n));
        }
        Ok(self.factorization.solve(rhs).column(0).into_owned())
    }
}

impl FemDiscretisation for Poisson1d {
    type Mesh = IntervalMesh;
    type Space = P1Space;
    type Function = Function;

    fn function_space(&self, mesh: &IntervalMesh, degree: usize) -> eyre::Result<P1Space> {
        if degree != 1 {
            return Err(eyre!(
                "only piecewise linear elements are supported, requested degree {}",
                degree
            ));
        }
        Ok(P1Space::new(mesh.clone()))
    }

    fn source(&self) -> Option<&Function> {
        self.source.as_ref()
    }

    fn dirichlet_dofs(&self, space: &P1Space) -> Vec<usize> {
        self.dirichlet_values(space)
            .into_iter()
            .map(|(dof, _)| dof)
            .collect()
    }

    fn assemble_operator(
        &self,
        space: &P1Space,
        coeff: &Function,
        treatment: DirichletTreatment,
    ) -> eyre::Result<CsrMatrix<f64>> {
        Ok(CsrMatrix::from(&self.assemble_coo(space, coeff, treatment)))
    }

    fn assemble_solve_operator(&self, space: &P1Space, coeff: &Function) -> eyre::Result<Box<dyn SolveOperator>> {
        let csc = CscMatrix::from(&self.assemble_coo(space, coeff, DirichletTreatment::Eliminate));
        let factorization = CscCholesky::factor(&csc)
            .map_err(|err| eyre!("Cholesky factorization of the mean operator failed: {:?}", err))?;
        Ok(Box::new(CholeskySolver { factorization }))
    }

    fn assemble_rhs(
        &self,
        space: &P1Space,
        coeff: &Function,
        with_dirichlet_bc: bool,
        with_neumann_bc: bool,
        f: Option<&Function>,
    ) -> eyre::Result<DVector<f64>> {
        let mesh = space.mesh();
        let mut b = DVector::zeros(space.dim());

        if let Some(f) = f {
            let quadrature = QuadratureSettings::default();
            for cell in 0..mesh.num_cells() {
                let (x0, x1) = mesh.cell(cell);
                let h = x1 - x0;
                b[cell] += quadrature.integrate(x0, x1, |x| f.value(x) * (x1 - x) / h);
                b[cell + 1] += quadrature.integrate(x0, x1, |x| f.value(x) * (x - x0) / h);
            }
        }

        if with_neumann_bc {
            for (dof, _, bc) in self.boundary(space) {
                if let BoundaryCondition::Neumann(g) = bc {
                    b[dof] += g;
                }
            }
        }

        if with_dirichlet_bc {
            let mut lifting = DVector::zeros(space.dim());
            for (dof, g) in self.dirichlet_values(space) {
                lifting[dof] = g;
            }
            let a = self.assemble_operator(space, coeff, DirichletTreatment::None)?;
            b -= &a * &lifting;
            for (dof, g) in self.dirichlet_values(space) {
                b[dof] = g;
            }
        }

        Ok(b)
    }

    fn set_dirichlet_bc_entries(&self, space: &P1Space, v: &mut DVector<f64>, homogeneous: bool) {
        for (dof, g) in self.dirichlet_values(space) {
            v[dof] = if homogeneous { 0.0 } else { g };
        }
    }

    fn residual_indicators(
        &self,
        space: &P1Space,
        a0: &Function,
        input: &ResidualInput<Function>,
    ) -> eyre::Result<DVector<f64>> {
        let mesh = space.mesh();
        let n_cells = mesh.num_cells();
        for (_, v) in &input.terms {
            if v.len() != space.dim() {
                return Err(eyre!(
                    "residual term of length {} in a space of dimension {}",
                    v.len(),
                    space.dim()
                ));
            }
        }

        // Slopes of every term on every cell
        let slopes: Vec<Vec<f64>> = input
            .terms
            .iter()
            .map(|(_, v)| (0..n_cells).map(|cell| space.gradient(v, cell)).collect())
            .collect();
        let flux = |x: f64, cell: usize| -> f64 {
            izip!(&input.terms, &slopes)
                .map(|((a, _), s)| a.value(x) * s[cell])
                .sum()
        };

        let mut indicators = DVector::zeros(n_cells);

        // Volume residual h_T^2 || a0^{-1/2} (f + sigma') ||^2
        for cell in 0..n_cells {
            let (x0, x1) = mesh.cell(cell);
            let h = x1 - x0;
            let residual = |x: f64| -> f64 {
                let load = input.source.map_or(0.0, |f| f.value(x));
                let divergence: f64 = izip!(&input.terms, &slopes)
                    .map(|((a, _), s)| a.derivative(x) * s[cell])
                    .sum();
                load + divergence
            };
            indicators[cell] = h * h
                * input
                    .quadrature
                    .integrate(x0, x1, |x| residual(x).powi(2) / a0.value(x));
        }

        // Flux jumps at interior vertices, split between both neighbours
        for vertex in 1..n_cells {
            let x = mesh.vertices()[vertex];
            let jump = flux(x, vertex) - flux(x, vertex - 1);
            let h = 0.5 * (mesh.cell_size(vertex - 1) + mesh.cell_size(vertex));
            let value = h * jump * jump / a0.value(x);
            indicators[vertex - 1] += 0.5 * value;
            indicators[vertex] += 0.5 * value;
        }

        // Neumann boundary residuals
        for (dof, normal, bc) in self.boundary(space) {
            if let BoundaryCondition::Neumann(g) = bc {
                let cell = if dof == 0 { 0 } else { n_cells - 1 };
                let x = mesh.vertices()[dof];
                let data = if input.with_neumann_bc { g } else { 0.0 };
                let residual = data - flux(x, cell) * normal;
                indicators[cell] += mesh.cell_size(cell) * residual * residual / a0.value(x);
            }
        }

        Ok(indicators)
    }

    fn energy_norm_squared(
        &self,
        space: &P1Space,
        v: &DVector<f64>,
        coeff: &Function,
        quadrature: QuadratureSettings,
    ) -> eyre::Result<DVector<f64>> {
        if v.len() != space.dim() {
            return Err(eyre!("vector of length {} in a space of dimension {}", v.len(), space.dim()));
        }
        let mesh = space.mesh();
        let energy = (0..mesh.num_cells())
            .map(|cell| {
                let (x0, x1) = mesh.cell(cell);
                let slope = space.gradient(v, cell);
                slope * slope * quadrature.integrate(x0, x1, |x| coeff.value(x))
            })
            .collect::<Vec<_>>();
        Ok(DVector::from_vec(energy))
    }

    fn coefficient_sup_ratio(&self, a_m: &Function, a0: &Function, maxh: f64) -> f64 {
        let (a, b) = self.domain;
        let n = ((b - a) / maxh).ceil().max(1.0) as usize;
        (0..=n)
            .map(|i| a + (b - a) * i as f64 / n as f64)
            .map(|x| (a_m.value(x) / a0.value(x)).abs())
            .fold(0.0, f64::max)
    }

    fn norms(&self, space: &P1Space, v: &DVector<f64>) -> (f64, f64) {
        let mesh = space.mesh();
        let mut l2 = 0.0;
        let mut h1 = 0.0;
        for cell in 0..mesh.num_cells() {
            let h = mesh.cell_size(cell);
            let (v0, v1) = (v[cell], v[cell + 1]);
            l2 += h / 3.0 * (v0 * v0 + v0 * v1 + v1 * v1);
            h1 += (v1 - v0).powi(2) / h;
        }
        (l2.sqrt(), h1.sqrt())
    }
}

impl fmt::Display for BoundaryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dirichlet(g) => write!(f, "u = {}", g),
            Self::Neumann(g) => write!(f, "a u' n = {}", g),
        }
    }
}
