use crate::space::MeshId;
use eyre::eyre;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A mesh of an interval $[a, b]$, given by its sorted vertices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalMesh {
    vertices: Vec<f64>,
    // Ids are only meaningful within one process
    #[serde(skip, default = "MeshId::fresh")]
    id: MeshId,
}

impl PartialEq for IntervalMesh {
    fn eq(&self, other: &Self) -> bool {
        self.vertices == other.vertices
    }
}

impl IntervalMesh {
    /// Construct a mesh from strictly increasing vertex coordinates.
    pub fn from_vertices(vertices: Vec<f64>) -> eyre::Result<Self> {
        if vertices.len() < 2 {
            return Err(eyre!("an interval mesh needs at least two vertices"));
        }
        if vertices.iter().any(|x| !x.is_finite()) {
            return Err(eyre!("mesh vertices must be finite"));
        }
        if vertices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(eyre!("mesh vertices must be strictly increasing"));
        }
        Ok(Self {
            vertices,
            id: MeshId::fresh(),
        })
    }

    /// A uniform mesh of `[a, b]` with `cells` cells.
    pub fn uniform(a: f64, b: f64, cells: usize) -> eyre::Result<Self> {
        if cells == 0 {
            return Err(eyre!("a mesh needs at least one cell"));
        }
        if !(a < b) {
            return Err(eyre!("invalid interval [{}, {}]", a, b));
        }
        let h = (b - a) / cells as f64;
        let mut vertices: Vec<_> = (0..cells).map(|i| a + i as f64 * h).collect();
        vertices.push(b);
        Self::from_vertices(vertices)
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn vertices(&self) -> &[f64] {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.vertices.len() - 1
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.vertices[0], self.vertices[self.vertices.len() - 1])
    }

    /// End points of cell `i`.
    pub fn cell(&self, i: usize) -> (f64, f64) {
        (self.vertices[i], self.vertices[i + 1])
    }

    pub fn cell_size(&self, i: usize) -> f64 {
        self.vertices[i + 1] - self.vertices[i]
    }

    pub fn hmax(&self) -> f64 {
        self.vertices
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(0.0, f64::max)
    }

    /// The cell containing `x`. Points on a shared vertex belong to the cell on the right,
    /// except for the right end point of the domain.
    pub fn locate_cell(&self, x: f64) -> Option<usize> {
        let (a, b) = self.domain();
        let tol = 1e-12 * (b - a);
        if x < a - tol || x > b + tol {
            return None;
        }
        let idx = self.vertices.partition_point(|&v| v <= x);
        Some(idx.saturating_sub(1).min(self.num_cells() - 1))
    }

    /// Bisect the marked cells.
    pub fn refine(&self, marked_cells: &BTreeSet<usize>) -> eyre::Result<Self> {
        if let Some(&invalid) = marked_cells.iter().find(|&&i| i >= self.num_cells()) {
            return Err(eyre!(
                "cannot refine cell {} of a mesh with {} cells",
                invalid,
                self.num_cells()
            ));
        }
        let mut vertices = Vec::with_capacity(self.vertices.len() + marked_cells.len());
        for i in 0..self.num_cells() {
            let (x0, x1) = self.cell(i);
            vertices.push(x0);
            if marked_cells.contains(&i) {
                vertices.push(0.5 * (x0 + x1));
            }
        }
        vertices.push(self.domain().1);
        Self::from_vertices(vertices)
    }

    pub fn refine_uniformly(&self) -> eyre::Result<Self> {
        self.refine(&(0..self.num_cells()).collect())
    }

    /// The common refinement of the given meshes.
    ///
    /// Returns (a clone of) the input mesh if all meshes are the same.
    pub fn joint(meshes: &[&IntervalMesh]) -> eyre::Result<Self> {
        let first = meshes
            .first()
            .ok_or_else(|| eyre!("cannot build the joint mesh of zero meshes"))?;
        if meshes.iter().all(|mesh| mesh.id == first.id) {
            return Ok((*first).clone());
        }

        let (a, b) = first.domain();
        let tol = 1e-12 * (b - a);
        for mesh in meshes {
            let (c, d) = mesh.domain();
            if (c - a).abs() > tol || (d - b).abs() > tol {
                return Err(eyre!(
                    "cannot join meshes of different domains [{}, {}] and [{}, {}]",
                    a,
                    b,
                    c,
                    d
                ));
            }
        }

        let mut all: Vec<f64> = meshes.iter().flat_map(|mesh| mesh.vertices.iter().copied()).collect();
        all.sort_by(f64::total_cmp);
        let mut vertices: Vec<f64> = Vec::with_capacity(all.len());
        for x in all {
            match vertices.last() {
                Some(&last) if x - last <= tol => {}
                _ => vertices.push(x),
            }
        }
        Self::from_vertices(vertices)
    }
}
