use crate::fem1d::mesh::IntervalMesh;
use crate::space::{FunctionSpace, MeshId};
use eyre::eyre;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Continuous piecewise linear functions on an interval mesh, with nodal degrees of freedom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct P1Space {
    mesh: IntervalMesh,
}

impl P1Space {
    pub fn new(mesh: IntervalMesh) -> Self {
        Self { mesh }
    }

    /// Slope of the function on cell `i`.
    pub fn gradient(&self, coeffs: &DVector<f64>, i: usize) -> f64 {
        (coeffs[i + 1] - coeffs[i]) / self.mesh.cell_size(i)
    }

    /// Evaluate the function at `x`, or `None` outside of the domain.
    pub fn evaluate(&self, coeffs: &DVector<f64>, x: f64) -> Option<f64> {
        let i = self.mesh.locate_cell(x)?;
        let (x0, _) = self.mesh.cell(i);
        Some(coeffs[i] + (x - x0) * self.gradient(coeffs, i))
    }

    /// The matrix mapping coefficients in `source` to their nodal interpolant in `self`.
    pub fn interpolation_matrix(&self, source: &P1Space) -> CsrMatrix<f64> {
        let source_mesh = &source.mesh;
        let mut coo = CooMatrix::new(self.dim(), source.dim());
        for (row, &x) in self.mesh.vertices().iter().enumerate() {
            let i = source_mesh
                .locate_cell(x)
                .unwrap_or(if x < source_mesh.domain().0 { 0 } else { source_mesh.num_cells() - 1 });
            let (x0, _) = source_mesh.cell(i);
            let t = ((x - x0) / source_mesh.cell_size(i)).clamp(0.0, 1.0);
            if t < 1.0 {
                coo.push(row, i, 1.0 - t);
            }
            if t > 0.0 {
                coo.push(row, i + 1, t);
            }
        }
        CsrMatrix::from(&coo)
    }
}

impl FunctionSpace for P1Space {
    type Mesh = IntervalMesh;

    fn mesh(&self) -> &IntervalMesh {
        &self.mesh
    }

    fn mesh_id(&self) -> MeshId {
        self.mesh.id()
    }

    fn dim(&self) -> usize {
        self.mesh.num_vertices()
    }

    fn num_cells(&self) -> usize {
        self.mesh.num_cells()
    }

    fn hmax(&self) -> f64 {
        self.mesh.hmax()
    }

    fn interpolate(&self, source: &Self, coeffs: &DVector<f64>) -> DVector<f64> {
        if self.mesh_id() == source.mesh_id() {
            return coeffs.clone();
        }
        &self.interpolation_matrix(source) * coeffs
    }

    fn restrict(&self, fine: &Self, dual: &DVector<f64>) -> DVector<f64> {
        if self.mesh_id() == fine.mesh_id() {
            return dual.clone();
        }
        &fine.interpolation_matrix(self).transpose() * dual
    }

    fn refine(&self, marked_cells: &BTreeSet<usize>) -> eyre::Result<Self> {
        Ok(Self::new(self.mesh.refine(marked_cells)?))
    }

    fn refine_uniformly(&self) -> eyre::Result<Self> {
        Ok(Self::new(self.mesh.refine_uniformly()?))
    }

    fn joint(spaces: &[&Self]) -> eyre::Result<Self> {
        let meshes: Vec<_> = spaces.iter().map(|space| &space.mesh).collect();
        Ok(Self::new(IntervalMesh::joint(&meshes)?))
    }

    fn accumulate_cell_values(&self, source: &Self, values: &DVector<f64>) -> DVector<f64> {
        if self.mesh_id() == source.mesh_id() {
            return values.clone();
        }
        let mut result = DVector::zeros(self.num_cells());
        for (j, value) in values.iter().enumerate() {
            let (x0, x1) = source.mesh.cell(j);
            if let Some(i) = self.mesh.locate_cell(0.5 * (x0 + x1)) {
                result[i] += value;
            }
        }
        result
    }

    fn share_mesh(&mut self, other: &Self) -> eyre::Result<()> {
        if self.mesh != other.mesh {
            return Err(eyre!(
                "cannot share a mesh of {} cells with a different mesh of {} cells",
                self.num_cells(),
                other.num_cells()
            ));
        }
        self.mesh = other.mesh.clone();
        Ok(())
    }
}
