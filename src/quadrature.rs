//! Composite quadrature on intervals, built on the Gauss rules of `fenris-quadrature`.
use fenris_quadrature::univariate;
use serde::{Deserialize, Serialize};

/// Weights and points of a one-dimensional quadrature rule.
pub type Rule1d = (Vec<f64>, Vec<f64>);

/// Polynomial degree integrated exactly when no degree is requested.
pub const DEFAULT_QUADRATURE_DEGREE: usize = 4;

/// Gauss rule with `num_points` points on the reference interval `[-1, 1]`.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(num_points: usize) -> Rule1d {
    let (weights, points) = univariate::gauss(num_points);
    (weights, points.into_iter().map(|[x]| x).collect())
}

/// Gauss rule integrating polynomials of the given degree exactly.
pub fn gauss_for_degree(degree: usize) -> Rule1d {
    gauss(degree / 2 + 1)
}

/// Controls the strength of numerical integration over cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadratureSettings {
    /// Polynomial degree to integrate exactly. `None` selects [`DEFAULT_QUADRATURE_DEGREE`].
    pub degree: Option<usize>,
    /// Each cell is split into this many equal sub-intervals (composite rule).
    pub subdivisions: usize,
}

impl Default for QuadratureSettings {
    fn default() -> Self {
        Self {
            degree: None,
            subdivisions: 1,
        }
    }
}

impl QuadratureSettings {
    pub fn with_degree(degree: Option<usize>) -> Self {
        Self {
            degree,
            ..Self::default()
        }
    }

    /// Quadrature weights and points mapped onto the interval `[a, b]`.
    pub fn interval_rule(&self, a: f64, b: f64) -> Rule1d {
        let (ref_weights, ref_points) = gauss_for_degree(self.degree.unwrap_or(DEFAULT_QUADRATURE_DEGREE));
        let subdivisions = self.subdivisions.max(1);
        let h = (b - a) / subdivisions as f64;
        (0..subdivisions)
            .flat_map(|k| {
                let x0 = a + k as f64 * h;
                ref_weights
                    .iter()
                    .zip(&ref_points)
                    .map(move |(w, xi)| (0.5 * h * w, x0 + 0.5 * h * (xi + 1.0)))
            })
            .unzip()
    }

    /// Approximate $\int_a^b f(x) \, dx$.
    pub fn integrate(&self, a: f64, b: f64, f: impl Fn(f64) -> f64) -> f64 {
        let (weights, points) = self.interval_rule(a, b);
        weights.iter().zip(&points).map(|(w, &x)| w * f(x)).sum()
    }
}
