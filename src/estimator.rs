//! Residual based a posteriori error estimation for stochastic Galerkin solutions.
//!
//! The estimator splits the error into three contributions:
//!
//! - a deterministic residual part $\eta$, built from cell residuals and flux jumps of every
//!   active mode,
//! - a projection part $\delta$, measuring the error introduced by transferring neighbouring
//!   modes between their independent meshes,
//! - the error of the iterative solver, given by the preconditioned residual norm $\zeta$.
//!
//! With the reliability constants $\gamma$, $c_\eta$ and $c_Q$ the total estimate is
//!
//! $$ \xi^2 = \frac{1}{1 - \gamma} \left( c_\eta^2 \eta^2 + c_Q^2 \delta^2 + (1 + c_Q)^2 \zeta^2 \right). $$
use crate::coefficient_field::CoefficientField;
use crate::multiindex::MultiIndex;
use crate::multi_vector::{get_projection, MultiVector, ProjectionCache};
use crate::quadrature::{QuadratureSettings, DEFAULT_QUADRATURE_DEGREE};
use crate::space::{FemDiscretisation, FunctionSpace, ResidualInput};
use log::{debug, info};
use nalgebra::DVector;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParameters {
    pub gamma: f64,
    pub ceta: f64,
    #[serde(rename = "cQ")]
    pub c_q: f64,
    /// Number of stochastic dimensions beyond the current maximum searched for new indices.
    pub newmi_add_maxm: usize,
    /// Resolution used when sampling coefficient ratios.
    pub maxh: f64,
    pub quadrature_degree: Option<usize>,
    /// Additional quadrature degree used for projection errors.
    pub projection_degree_increase: usize,
    /// Number of uniform bisections of each cell when integrating projection errors.
    pub refine_projection_mesh: usize,
}

impl Default for EstimatorParameters {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            ceta: 6.0,
            c_q: 1.0,
            newmi_add_maxm: 20,
            maxh: 0.1,
            quadrature_degree: None,
            projection_degree_increase: 1,
            refine_projection_mesh: 1,
        }
    }
}

impl EstimatorParameters {
    fn reliability_factor(&self) -> f64 {
        1.0 / (1.0 - self.gamma).sqrt()
    }

    fn quadrature(&self) -> QuadratureSettings {
        QuadratureSettings::with_degree(self.quadrature_degree)
    }

    fn projection_quadrature(&self) -> QuadratureSettings {
        let degree = self.quadrature_degree.unwrap_or(DEFAULT_QUADRATURE_DEGREE);
        QuadratureSettings {
            degree: Some(degree + self.projection_degree_increase),
            subdivisions: 1 << self.refine_projection_mesh.min(16),
        }
    }
}

/// The weighted error contributions whose Euclidean norm is $\xi$.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorParts {
    pub res_part: f64,
    pub proj_part: f64,
    pub pcg_part: f64,
}

/// The unweighted squared errors $(\eta^2, \delta^2, \zeta^2)$.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorComponents {
    pub residual: f64,
    pub projection: f64,
    pub pcg: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EstimatorTiming {
    pub residual: Duration,
    pub projection: Duration,
    pub multiindex: Duration,
}

#[derive(Debug, Clone)]
pub struct ErrorEstimate {
    /// The global error estimate.
    pub xi: f64,
    /// Squared residual indicators per cell of every active component.
    pub residual_indicators: BTreeMap<MultiIndex, DVector<f64>>,
    /// Squared projection indicators per cell of every active component.
    pub projection_indicators: BTreeMap<MultiIndex, DVector<f64>>,
    /// Estimated contribution of inactive multi-indices.
    pub mi_error: BTreeMap<MultiIndex, f64>,
    pub parts: ErrorParts,
    pub errors: ErrorComponents,
    pub timing: EstimatorTiming,
}

impl ErrorEstimate {
    /// The residual error $\eta_\mu$ of one component.
    pub fn residual_error(&self, mu: &MultiIndex) -> f64 {
        self.residual_indicators
            .get(mu)
            .map(|ind| ind.sum().sqrt())
            .unwrap_or(0.0)
    }

    /// The projection error $\delta_\mu$ of one component.
    pub fn projection_error(&self, mu: &MultiIndex) -> f64 {
        self.projection_indicators
            .get(mu)
            .map(|ind| ind.sum().sqrt())
            .unwrap_or(0.0)
    }
}

/// Combine the error components into the weighted parts and the total estimate $\xi$.
pub fn combine_errors(eta: f64, delta: f64, zeta: f64, params: &EstimatorParameters) -> (f64, ErrorParts) {
    let factor = params.reliability_factor();
    let parts = ErrorParts {
        res_part: params.ceta * factor * eta,
        proj_part: params.c_q * factor * delta,
        pcg_part: (1.0 + params.c_q) * factor * zeta,
    };
    let xi = (parts.res_part.powi(2) + parts.proj_part.powi(2) + parts.pcg_part.powi(2)).sqrt();
    (xi, parts)
}

/// Lazily evaluated $\| a_m / a_0 \|_\infty$.
struct CoefficientRatios<'a, D: FemDiscretisation> {
    pde: &'a D,
    coeff_field: &'a CoefficientField<D::Function>,
    maxh: f64,
    values: FxHashMap<usize, f64>,
}

impl<'a, D: FemDiscretisation> CoefficientRatios<'a, D> {
    fn get(&mut self, m: usize) -> f64 {
        if let Some(&ratio) = self.values.get(&m) {
            return ratio;
        }
        let (a_m, _) = &self.coeff_field[m];
        let ratio = self
            .pde
            .coefficient_sup_ratio(a_m, self.coeff_field.mean_func(), self.maxh);
        self.values.insert(m, ratio);
        ratio
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResidualEstimator;

impl ResidualEstimator {
    /// Evaluate the error estimator for the solution `w`.
    ///
    /// `f` is the volume load and `zeta` the preconditioned residual norm of the iterative
    /// solver that produced `w`.
    pub fn evaluate_error<D: FemDiscretisation>(
        w: &MultiVector<D::Space>,
        coeff_field: &CoefficientField<D::Function>,
        pde: &D,
        f: Option<&D::Function>,
        zeta: f64,
        params: &EstimatorParameters,
    ) -> eyre::Result<ErrorEstimate> {
        let mut cache = ProjectionCache::new();
        Self::evaluate_error_with_cache(w, coeff_field, pde, f, zeta, params, &mut cache)
    }

    /// Like [`evaluate_error`](Self::evaluate_error), with projections between component meshes
    /// taken from and stored in `cache`.
    ///
    /// The residual and projection indicators transfer the same neighbours, so every projection
    /// is computed at most once per evaluation.
    pub fn evaluate_error_with_cache<D: FemDiscretisation>(
        w: &MultiVector<D::Space>,
        coeff_field: &CoefficientField<D::Function>,
        pde: &D,
        f: Option<&D::Function>,
        zeta: f64,
        params: &EstimatorParameters,
        cache: &mut ProjectionCache,
    ) -> eyre::Result<ErrorEstimate> {
        let maxm = coeff_field.truncate_dimensions(w.max_order());
        let mut ratios = CoefficientRatios {
            pde,
            coeff_field,
            maxh: params.maxh,
            values: FxHashMap::default(),
        };
        let mut timing = EstimatorTiming::default();

        let start = Instant::now();
        let mut residual_indicators = BTreeMap::new();
        for (mu, _) in w.iter() {
            let indicators = Self::evaluate_residual(w, mu, coeff_field, pde, f, maxm, cache, params)?;
            debug_assert!(indicators.iter().all(|&v| v >= 0.0));
            residual_indicators.insert(mu.clone(), indicators);
        }
        timing.residual = start.elapsed();

        let start = Instant::now();
        let mut projection_indicators = BTreeMap::new();
        for (mu, _) in w.iter() {
            let indicators = Self::evaluate_projection(w, mu, coeff_field, pde, maxm, &mut ratios, cache, params)?;
            projection_indicators.insert(mu.clone(), indicators);
        }
        timing.projection = start.elapsed();

        let start = Instant::now();
        let mi_error = Self::evaluate_multiindex_candidates(w, coeff_field, pde, &mut ratios, params);
        timing.multiindex = start.elapsed();

        let eta_squared: f64 = residual_indicators.values().map(|ind| ind.sum()).sum();
        let delta_squared: f64 = projection_indicators.values().map(|ind| ind.sum()).sum();
        let errors = ErrorComponents {
            residual: eta_squared,
            projection: delta_squared,
            pcg: zeta * zeta,
        };
        let (xi, parts) = combine_errors(eta_squared.sqrt(), delta_squared.sqrt(), zeta, params);

        info!(
            "error estimate xi = {:.4e} (res {:.4e}, proj {:.4e}, pcg {:.4e}), {} candidate multi-indices",
            xi,
            parts.res_part,
            parts.proj_part,
            parts.pcg_part,
            mi_error.len()
        );

        Ok(ErrorEstimate {
            xi,
            residual_indicators,
            projection_indicators,
            mi_error,
            parts,
            errors,
            timing,
        })
    }

    /// Squared residual indicators of component `mu`.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_residual<D: FemDiscretisation>(
        w: &MultiVector<D::Space>,
        mu: &MultiIndex,
        coeff_field: &CoefficientField<D::Function>,
        pde: &D,
        f: Option<&D::Function>,
        maxm: usize,
        cache: &mut ProjectionCache,
        params: &EstimatorParameters,
    ) -> eyre::Result<DVector<f64>> {
        let component = &w[mu];
        let space = &component.space;
        let a0 = coeff_field.mean_func();

        let mut terms = vec![(a0, component.coeffs.clone())];
        for m in 0..maxm {
            let (a_m, rv) = &coeff_field[m];
            let beta = rv.orth_polys().get_beta(mu.degree(m));
            let mut v = &component.coeffs * (-beta.center);
            let up = mu.increment(m);
            if w.contains(&up) {
                v.axpy(beta.next, &get_projection(w, &up, space, cache), 1.0);
            }
            if let Ok(down) = mu.decrement(m) {
                if w.contains(&down) {
                    v.axpy(beta.previous, &get_projection(w, &down, space, cache), 1.0);
                }
            }
            terms.push((a_m, v));
        }

        let input = ResidualInput {
            terms,
            source: if mu.is_zero() { f } else { None },
            with_neumann_bc: mu.is_zero(),
            quadrature: params.quadrature(),
        };
        pde.residual_indicators(space, a0, &input)
    }

    /// Squared projection indicators of component `mu`.
    ///
    /// For each active neighbour $\nu = \mu \pm e_m$ the transfer error
    /// $w_\nu - \Pi_\nu \Pi_\mu w_\nu$ is measured in the energy norm on the cells of $\nu$ and
    /// attributed to the cells of $\mu$ containing them.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_projection<D: FemDiscretisation>(
        w: &MultiVector<D::Space>,
        mu: &MultiIndex,
        coeff_field: &CoefficientField<D::Function>,
        pde: &D,
        maxm: usize,
        ratios: &mut CoefficientRatios<D>,
        cache: &mut ProjectionCache,
        params: &EstimatorParameters,
    ) -> eyre::Result<DVector<f64>> {
        let space = &w[mu].space;
        let a0 = coeff_field.mean_func();
        let quadrature = params.projection_quadrature();
        let mut indicators = DVector::zeros(space.num_cells());

        for m in 0..maxm {
            let (_, rv) = &coeff_field[m];
            let beta = rv.orth_polys().get_beta(mu.degree(m));
            let mut neighbours = vec![(mu.increment(m), beta.next)];
            if let Ok(down) = mu.decrement(m) {
                neighbours.push((down, beta.previous));
            }

            for (nu, weight) in neighbours {
                let Some(neighbour) = w.get(&nu) else {
                    continue;
                };
                if neighbour.space.mesh_id() == space.mesh_id() {
                    continue;
                }
                let on_mu = get_projection(w, &nu, space, cache);
                let back = neighbour.space.interpolate(space, &on_mu);
                let difference = &neighbour.coeffs - back;
                let energy = pde.energy_norm_squared(&neighbour.space, &difference, a0, quadrature)?;
                let factor = (ratios.get(m) * weight).powi(2);
                indicators.axpy(factor, &space.accumulate_cell_values(&neighbour.space, &energy), 1.0);
            }
        }

        debug!("projection error of {}: {:.4e}", mu, indicators.sum().sqrt());
        Ok(indicators)
    }

    /// Estimated contribution of inactive neighbours $\mu + e_m$ of active indices.
    fn evaluate_multiindex_candidates<D: FemDiscretisation>(
        w: &MultiVector<D::Space>,
        coeff_field: &CoefficientField<D::Function>,
        pde: &D,
        ratios: &mut CoefficientRatios<D>,
        params: &EstimatorParameters,
    ) -> BTreeMap<MultiIndex, f64> {
        let search_dims = coeff_field.truncate_dimensions(w.max_order() + params.newmi_add_maxm);
        let mut mi_error = BTreeMap::new();
        for (mu, component) in w.iter() {
            let (_, h1) = pde.norms(&component.space, &component.coeffs);
            for m in 0..search_dims {
                let candidate = mu.increment(m);
                if w.contains(&candidate) {
                    continue;
                }
                let (_, rv) = &coeff_field[m];
                let beta = rv.orth_polys().get_beta(mu.degree(m));
                let value = ratios.get(m) * beta.next.abs() * h1;
                let entry = mi_error.entry(candidate).or_insert(0.0);
                if value > *entry {
                    *entry = value;
                }
            }
        }
        mi_error
    }
}
