//! The adaptive refinement loop.
//!
//! Each iteration solves the stochastic Galerkin system with PCG, estimates the error, marks
//! cells and multi-indices and refines. The loop stops when the estimate drops below the
//! requested tolerance or a budget is exhausted.
use crate::coefficient_field::CoefficientField;
use crate::estimator::{ErrorEstimate, EstimatorParameters, ResidualEstimator};
use crate::marking::{
    mark, refine, refine_uniformly, MarkingParameters, MarkingResult, MarkingStrategy, ProjectionMarking,
};
use crate::multiindex::MultiIndex;
use crate::multi_vector::{Component, MultiVector};
use crate::observer::{LogObserver, ResourceProbe, SolverEvent, SolverObserver};
use crate::operator::{AssemblyType, LinearOperator, MultiOperator, PreconditioningOperator};
use crate::pcg::{CgOutput, ConjugateGradient, RelativeResidualCriterion};
use crate::space::{FemDiscretisation, FunctionSpace};
use eyre::eyre;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Which kinds of refinement are carried out after marking.
///
/// Disabling a kind does not affect the error estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementToggles {
    /// Residual-driven cell refinement.
    #[serde(rename = "RES")]
    pub residual: bool,
    /// Projection-driven cell refinement.
    #[serde(rename = "PROJ")]
    pub projection: bool,
    /// Activation of new multi-indices.
    #[serde(rename = "MI")]
    pub multiindex: bool,
}

impl RefinementToggles {
    pub fn none() -> Self {
        Self {
            residual: false,
            projection: false,
            multiindex: false,
        }
    }
}

impl Default for RefinementToggles {
    fn default() -> Self {
        Self {
            residual: true,
            projection: true,
            multiindex: false,
        }
    }
}

/// Tuning parameters of the adaptive solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParameters {
    pub gamma: f64,
    #[serde(rename = "cQ")]
    pub c_q: f64,
    pub ceta: f64,
    pub theta_eta: f64,
    pub theta_zeta: f64,
    pub min_zeta: f64,
    pub maxh: f64,
    pub newmi_add_maxm: usize,
    pub theta_delta: f64,
    #[serde(rename = "max_Lambda_frac")]
    pub max_lambda_frac: f64,
    pub quadrature_degree: Option<usize>,
    pub projection_degree_increase: usize,
    pub refine_projection_mesh: usize,
    pub pcg_eps: f64,
    pub pcg_maxiter: usize,
    pub error_eps: f64,
    pub max_refinements: usize,
    pub max_dof: f64,
    pub do_refinement: RefinementToggles,
    pub do_uniform_refinement: bool,
    pub marking_strategy: MarkingStrategy,
    pub projection_marking: ProjectionMarking,
    pub assembly_type: AssemblyType,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            c_q: 1.0,
            ceta: 6.0,
            theta_eta: 0.4,
            theta_zeta: 0.1,
            min_zeta: 1e-8,
            maxh: 0.1,
            newmi_add_maxm: 20,
            theta_delta: 10.0,
            max_lambda_frac: 0.1,
            quadrature_degree: None,
            projection_degree_increase: 1,
            refine_projection_mesh: 1,
            pcg_eps: 1e-6,
            pcg_maxiter: 100,
            error_eps: 1e-2,
            max_refinements: 5,
            max_dof: 1e10,
            do_refinement: RefinementToggles::default(),
            do_uniform_refinement: false,
            marking_strategy: MarkingStrategy::default(),
            projection_marking: ProjectionMarking::default(),
            assembly_type: AssemblyType::default(),
        }
    }
}

/// Invalid input detected before the adaptive loop starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    EmptyActiveSet,
    InvalidParameter {
        name: &'static str,
        value: f64,
        requirement: &'static str,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyActiveSet => write!(f, "the initial set of multi-indices is empty"),
            Self::InvalidParameter {
                name,
                value,
                requirement,
            } => write!(f, "invalid parameter {} = {}: {}", name, value, requirement),
        }
    }
}

impl Error for ConfigurationError {}

impl SolverParameters {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let check = |name: &'static str, value: f64, valid: bool, requirement: &'static str| {
            if valid {
                Ok(())
            } else {
                Err(ConfigurationError::InvalidParameter {
                    name,
                    value,
                    requirement,
                })
            }
        };
        check("gamma", self.gamma, self.gamma > 0.0 && self.gamma < 1.0, "must lie in (0, 1)")?;
        check("cQ", self.c_q, self.c_q >= 0.0, "must be non-negative")?;
        check("ceta", self.ceta, self.ceta >= 0.0, "must be non-negative")?;
        check(
            "theta_eta",
            self.theta_eta,
            (0.0..=1.0).contains(&self.theta_eta),
            "must lie in [0, 1]",
        )?;
        check(
            "theta_zeta",
            self.theta_zeta,
            (0.0..=1.0).contains(&self.theta_zeta),
            "must lie in [0, 1]",
        )?;
        check("theta_delta", self.theta_delta, self.theta_delta >= 1.0, "must be at least 1")?;
        check("min_zeta", self.min_zeta, self.min_zeta >= 0.0, "must be non-negative")?;
        check("maxh", self.maxh, self.maxh > 0.0, "must be positive")?;
        check(
            "max_Lambda_frac",
            self.max_lambda_frac,
            self.max_lambda_frac >= 0.0,
            "must be non-negative",
        )?;
        check("pcg_eps", self.pcg_eps, self.pcg_eps > 0.0, "must be positive")?;
        check(
            "pcg_maxiter",
            self.pcg_maxiter as f64,
            self.pcg_maxiter > 0,
            "must be positive",
        )?;
        check("error_eps", self.error_eps, self.error_eps >= 0.0, "must be non-negative")?;
        Ok(())
    }

    pub fn estimator_parameters(&self) -> EstimatorParameters {
        EstimatorParameters {
            gamma: self.gamma,
            ceta: self.ceta,
            c_q: self.c_q,
            newmi_add_maxm: self.newmi_add_maxm,
            maxh: self.maxh,
            quadrature_degree: self.quadrature_degree,
            projection_degree_increase: self.projection_degree_increase,
            refine_projection_mesh: self.refine_projection_mesh,
        }
    }

    pub fn marking_parameters(&self) -> MarkingParameters {
        MarkingParameters {
            theta_eta: self.theta_eta,
            theta_zeta: self.theta_zeta,
            theta_delta: self.theta_delta,
            min_zeta: self.min_zeta,
            max_lambda_frac: self.max_lambda_frac,
            strategy: self.marking_strategy,
            projection_marking: self.projection_marking,
        }
    }
}

/// Statistics of one refinement iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationStats {
    #[serde(rename = "TIME-PCG")]
    pub time_pcg: f64,
    #[serde(rename = "TIME-ESTIMATOR")]
    pub time_estimator: f64,
    #[serde(rename = "TIME-MARKING")]
    pub time_marking: f64,
    #[serde(rename = "TIME-RESIDUAL")]
    pub time_residual: f64,
    #[serde(rename = "TIME-PROJECTION")]
    pub time_projection: f64,
    #[serde(rename = "TIME-MI")]
    pub time_multiindex: f64,
    #[serde(rename = "EST")]
    pub xi: f64,
    #[serde(rename = "RES-PART")]
    pub res_part: f64,
    #[serde(rename = "PROJ-PART")]
    pub proj_part: f64,
    #[serde(rename = "PCG-PART")]
    pub pcg_part: f64,
    #[serde(rename = "ERR-RES")]
    pub err_res: f64,
    #[serde(rename = "ERR-PROJ")]
    pub err_proj: f64,
    #[serde(rename = "ERR-PCG")]
    pub err_pcg: f64,
    #[serde(rename = "RES-mu")]
    pub res_mu: Vec<(MultiIndex, f64)>,
    #[serde(rename = "PROJ-mu")]
    pub proj_mu: Vec<(MultiIndex, f64)>,
    #[serde(rename = "PROJ-MAX-ZETA")]
    pub proj_max_zeta: f64,
    #[serde(rename = "PROJ-MAX-INACTIVE-ZETA")]
    pub proj_max_inactive_zeta: f64,
    #[serde(rename = "PROJ-INACTIVE-ZETA")]
    pub proj_inactive_zeta: Vec<f64>,
    #[serde(rename = "MARKING-RES")]
    pub marking_res: usize,
    #[serde(rename = "MARKING-PROJ")]
    pub marking_proj: usize,
    #[serde(rename = "MARKING-MI")]
    pub marking_mi: usize,
    /// Active multi-indices with the number of degrees of freedom of their components.
    #[serde(rename = "MI")]
    pub multiindices: Vec<(MultiIndex, usize)>,
    #[serde(rename = "DOFS")]
    pub dofs: usize,
    #[serde(rename = "CELLS")]
    pub cells: usize,
    #[serde(rename = "PCG-ITERATIONS")]
    pub pcg_iterations: usize,
    #[serde(rename = "ZETA")]
    pub zeta: f64,
    #[serde(rename = "RESIDUAL-L2")]
    pub residual_l2: f64,
    #[serde(rename = "RESIDUAL-H1")]
    pub residual_h1: f64,
    #[serde(rename = "MEMORY")]
    pub memory: Option<f64>,
}

impl SimulationStats {
    /// The active set of the recorded iteration, in ascending order.
    pub fn active_indices(&self) -> Vec<MultiIndex> {
        self.multiindices.iter().map(|(mu, _)| mu.clone()).collect()
    }

    fn record_estimate(&mut self, estimate: &ErrorEstimate) {
        self.time_residual = estimate.timing.residual.as_secs_f64();
        self.time_projection = estimate.timing.projection.as_secs_f64();
        self.time_multiindex = estimate.timing.multiindex.as_secs_f64();
        self.xi = estimate.xi;
        self.res_part = estimate.parts.res_part;
        self.proj_part = estimate.parts.proj_part;
        self.pcg_part = estimate.parts.pcg_part;
        self.err_res = estimate.errors.residual;
        self.err_proj = estimate.errors.projection;
        self.err_pcg = estimate.errors.pcg;
        self.res_mu = estimate
            .residual_indicators
            .keys()
            .map(|mu| (mu.clone(), estimate.residual_error(mu)))
            .collect();
        self.proj_mu = estimate
            .projection_indicators
            .keys()
            .map(|mu| (mu.clone(), estimate.projection_error(mu)))
            .collect();
    }

    fn record_marking(&mut self, result: &MarkingResult) {
        self.marking_res = result.num_residual_cells();
        self.marking_proj = result.num_projection_cells();
        self.marking_mi = result.new_multiindices.len();
        self.proj_max_zeta = result.zeta_stats.max_zeta;
        self.proj_max_inactive_zeta = result.zeta_stats.max_inactive_zeta;
        self.proj_inactive_zeta = result.zeta_stats.inactive_zeta.clone();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustionReason {
    /// The maximum number of refinement iterations was reached.
    Refinements,
    /// The number of degrees of freedom reached `max_dof`.
    Dofs,
    /// The stop flag was raised.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    Exhausted(ExhaustionReason),
}

/// The result of an adaptive run.
///
/// `stats` and `history` (if kept) are index-aligned: entry `k` describes the solution of
/// refinement iteration `k`.
#[derive(Debug, Clone)]
pub struct SolverOutput<S> {
    pub w: MultiVector<S>,
    pub stats: Vec<SimulationStats>,
    pub history: Option<Vec<MultiVector<S>>>,
    pub termination: Termination,
}

/// Assemble the stochastic Galerkin right-hand side for the active set of `w`.
///
/// The load and Neumann data enter the zero index. Dirichlet data $g$ is lifted through the
/// mean and through every $a_m$: the lifting of $a_m$ contributes to the zero index weighted by
/// $-\beta^m_0$ and to $e_m$ weighted by $\beta^m_+$, both at degree zero.
pub fn prepare_rhs<D: FemDiscretisation>(
    w: &MultiVector<D::Space>,
    coeff_field: &CoefficientField<D::Function>,
    pde: &D,
) -> eyre::Result<MultiVector<D::Space>> {
    let mut b = w.zeros_like();
    let zero = MultiIndex::zero();
    let Some(mean_component) = w.get(&zero) else {
        warn!("zero multi-index is inactive, right-hand side vanishes");
        return Ok(b);
    };

    let maxm = coeff_field.truncate_dimensions(w.max_order());
    let mut b0 = pde.assemble_rhs(
        &mean_component.space,
        coeff_field.mean_func(),
        true,
        true,
        pde.source(),
    )?;

    for m in 0..maxm {
        let (a_m, rv) = &coeff_field[m];
        let beta = rv.orth_polys().get_beta(0);

        let mut g0m = pde.assemble_rhs(&mean_component.space, a_m, true, false, None)?;
        pde.set_dirichlet_bc_entries(&mean_component.space, &mut g0m, true);
        b0.axpy(-beta.center, &g0m, 1.0);

        let e_m = MultiIndex::unit(m);
        if let Some(component) = b.get_mut(&e_m) {
            let mut gm = pde.assemble_rhs(&component.space, a_m, true, false, None)?;
            pde.set_dirichlet_bc_entries(&component.space, &mut gm, true);
            component.coeffs.axpy(beta.next, &gm, 1.0);
        }
    }

    if let Some(component) = b.get_mut(&zero) {
        component.coeffs = b0;
    }
    Ok(b)
}

/// Result of [`pcg_solve`].
#[derive(Debug, Clone)]
pub struct PcgSolution<S> {
    pub w: MultiVector<S>,
    pub output: CgOutput,
    /// $L^2$ norm of the algebraic residual $b - A w$, read as a finite element function.
    pub residual_l2: f64,
    /// $H^1$ seminorm of the algebraic residual.
    pub residual_h1: f64,
}

/// Solve the stochastic Galerkin system with the mean-based preconditioner, starting from `w`.
pub fn pcg_solve<D: FemDiscretisation>(
    operator: &MultiOperator<D>,
    w: &MultiVector<D::Space>,
    eps: f64,
    maxiter: usize,
) -> eyre::Result<PcgSolution<D::Space>> {
    let pde = operator.pde();
    let coeff_field = operator.coeff_field();
    let b = prepare_rhs(w, coeff_field, pde)?;
    let preconditioner = PreconditioningOperator::new(pde, coeff_field.mean_func(), w)?;

    let mut solution = w.clone();
    let output = ConjugateGradient::new()
        .with_operator(operator)
        .with_preconditioner(&preconditioner)
        .with_stopping_criterion(RelativeResidualCriterion::new(eps))
        .with_max_iter(maxiter)
        .solve_with_guess(&b, &mut solution)?;

    let mut residual = b;
    residual.axpy(-1.0, &operator.apply(&solution)?);
    let (mut l2, mut h1) = (0.0, 0.0);
    for (_, component) in residual.iter() {
        let (l2_mu, h1_mu) = pde.norms(&component.space, &component.coeffs);
        l2 += l2_mu * l2_mu;
        h1 += h1_mu * h1_mu;
    }

    Ok(PcgSolution {
        w: solution,
        output,
        residual_l2: l2.sqrt(),
        residual_h1: h1.sqrt(),
    })
}

/// A zero component on `mesh`, uniformly refined until its cells are no larger than `maxh`.
pub fn setup_vector<D: FemDiscretisation>(
    pde: &D,
    mesh: &D::Mesh,
    degree: usize,
    maxh: Option<f64>,
) -> eyre::Result<Component<D::Space>> {
    let mut space = pde.function_space(mesh, degree)?;
    if let Some(maxh) = maxh {
        if maxh <= 0.0 {
            return Err(eyre!("maximal mesh size must be positive, got {}", maxh));
        }
        while space.hmax() > maxh {
            space = space.refine_uniformly()?;
        }
    }
    Ok(Component::zeros(space))
}

enum RefinementPlan {
    Uniform,
    Marked(MarkingResult),
}

enum LoopState {
    Solve,
    Estimate,
    Mark(ErrorEstimate),
    Refine(RefinementPlan),
    Converged,
    Exhausted(ExhaustionReason),
}

/// Drives the solve, estimate, mark and refine cycle.
pub struct AdaptiveSolver<D: FemDiscretisation> {
    pde: Arc<D>,
    coeff_field: Arc<CoefficientField<D::Function>>,
    base_mesh: D::Mesh,
    degree: usize,
    params: SolverParameters,
    probe: Option<Box<dyn ResourceProbe>>,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<D: FemDiscretisation> AdaptiveSolver<D> {
    pub fn new(
        pde: Arc<D>,
        coeff_field: Arc<CoefficientField<D::Function>>,
        base_mesh: D::Mesh,
        degree: usize,
        params: SolverParameters,
    ) -> Self {
        Self {
            pde,
            coeff_field,
            base_mesh,
            degree,
            params,
            probe: None,
            stop_flag: None,
        }
    }

    pub fn with_resource_probe(self, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            probe: Some(probe),
            ..self
        }
    }

    /// The loop stops after the estimate of the current iteration once `flag` is set.
    pub fn with_stop_flag(self, flag: Arc<AtomicBool>) -> Self {
        Self {
            stop_flag: Some(flag),
            ..self
        }
    }

    pub fn parameters(&self) -> &SolverParameters {
        &self.params
    }

    /// Zero components on the base mesh for the given multi-indices.
    pub fn initial_vector(&self, multiindices: &[MultiIndex]) -> eyre::Result<MultiVector<D::Space>> {
        if multiindices.is_empty() {
            return Err(ConfigurationError::EmptyActiveSet.into());
        }
        let mut w = MultiVector::new();
        for mu in multiindices {
            w.insert(mu.clone(), setup_vector(self.pde.as_ref(), &self.base_mesh, self.degree, None)?);
        }
        Ok(w)
    }

    /// Run the adaptive loop, logging progress.
    ///
    /// See [`run_with_observer`](Self::run_with_observer).
    pub fn run(
        &self,
        w: MultiVector<D::Space>,
        stats: Vec<SimulationStats>,
        history: Option<Vec<MultiVector<D::Space>>>,
    ) -> eyre::Result<SolverOutput<D::Space>> {
        self.run_with_observer(w, stats, history, &mut LogObserver)
    }

    /// Run the adaptive loop starting from `w`.
    ///
    /// A non-empty `stats` resumes a previous run: iteration `stats.len() - 1` is recomputed
    /// from `w` and its record (and history entry) is replaced. Solutions are appended to
    /// `history` if given.
    pub fn run_with_observer(
        &self,
        mut w: MultiVector<D::Space>,
        mut stats: Vec<SimulationStats>,
        mut history: Option<Vec<MultiVector<D::Space>>>,
        observer: &mut dyn SolverObserver,
    ) -> eyre::Result<SolverOutput<D::Space>> {
        self.params.validate()?;
        if w.is_empty() {
            return Err(ConfigurationError::EmptyActiveSet.into());
        }

        let pde = self.pde.as_ref();
        let params = &self.params;
        let estimator_params = params.estimator_parameters();
        let marking_params = params.marking_parameters();
        let operator = MultiOperator::new(self.coeff_field.clone(), self.pde.clone(), params.assembly_type);

        if let Some(history) = history.as_ref() {
            if history.len() != stats.len() {
                return Err(eyre!(
                    "cannot resume with {} statistics records and {} history entries",
                    stats.len(),
                    history.len()
                ));
            }
        }

        let mut k = stats.len().saturating_sub(1);
        stats.truncate(k);
        if let Some(history) = history.as_mut() {
            history.truncate(k);
        }
        if k > 0 {
            info!("resuming adaptive loop at iteration {}", k);
        }

        let mut record = SimulationStats::default();
        let mut state = LoopState::Solve;
        let termination = loop {
            state = match state {
                LoopState::Solve => {
                    observer.notify(&SolverEvent::IterationStarted {
                        iteration: k,
                        active_indices: w.len(),
                        dofs: w.dim(),
                    });
                    let start = Instant::now();
                    let solution = pcg_solve(&operator, &w, params.pcg_eps, params.pcg_maxiter)?;
                    w = solution.w;

                    record = SimulationStats {
                        time_pcg: start.elapsed().as_secs_f64(),
                        pcg_iterations: solution.output.num_iterations,
                        zeta: solution.output.residual_norm,
                        residual_l2: solution.residual_l2,
                        residual_h1: solution.residual_h1,
                        multiindices: w.iter().map(|(mu, c)| (mu.clone(), c.space.dim())).collect(),
                        dofs: w.dim(),
                        cells: w.num_cells(),
                        ..SimulationStats::default()
                    };
                    if let Some(history) = history.as_mut() {
                        history.push(w.clone());
                    }
                    observer.notify(&SolverEvent::PcgFinished {
                        iteration: k,
                        num_iterations: solution.output.num_iterations,
                        zeta: solution.output.residual_norm,
                        converged: solution.output.converged,
                    });
                    LoopState::Estimate
                }
                LoopState::Estimate => {
                    let start = Instant::now();
                    let estimate = ResidualEstimator::evaluate_error(
                        &w,
                        &self.coeff_field,
                        pde,
                        pde.source(),
                        record.zeta,
                        &estimator_params,
                    )?;
                    record.time_estimator = start.elapsed().as_secs_f64();
                    record.record_estimate(&estimate);
                    record.memory = self.probe.as_ref().and_then(|probe| probe.memory_usage());
                    stats.push(record.clone());
                    observer.notify(&SolverEvent::EstimateComputed {
                        iteration: k,
                        xi: estimate.xi,
                        res_part: estimate.parts.res_part,
                        proj_part: estimate.parts.proj_part,
                        pcg_part: estimate.parts.pcg_part,
                    });

                    if k > params.max_refinements {
                        LoopState::Exhausted(ExhaustionReason::Refinements)
                    } else if record.dofs as f64 >= params.max_dof {
                        LoopState::Exhausted(ExhaustionReason::Dofs)
                    } else if estimate.xi <= params.error_eps {
                        LoopState::Converged
                    } else if k == params.max_refinements {
                        LoopState::Exhausted(ExhaustionReason::Refinements)
                    } else if self
                        .stop_flag
                        .as_ref()
                        .map_or(false, |flag| flag.load(Ordering::SeqCst))
                    {
                        LoopState::Exhausted(ExhaustionReason::Cancelled)
                    } else {
                        LoopState::Mark(estimate)
                    }
                }
                LoopState::Mark(estimate) => {
                    let start = Instant::now();
                    let plan = if params.do_uniform_refinement {
                        RefinementPlan::Uniform
                    } else {
                        let mut result = mark(
                            &estimate.residual_indicators,
                            &estimate.projection_indicators,
                            &estimate.mi_error,
                            w.max_order(),
                            &marking_params,
                        );
                        let toggles = params.do_refinement;
                        if !toggles.residual {
                            result.residual_markers.clear();
                        }
                        if !toggles.projection {
                            result.projection_markers.clear();
                        }
                        if !toggles.multiindex {
                            result.new_multiindices.clear();
                        }
                        RefinementPlan::Marked(result)
                    };

                    let current = stats
                        .last_mut()
                        .ok_or_else(|| eyre!("statistics record of iteration {} is missing", k))?;
                    current.time_marking = start.elapsed().as_secs_f64();
                    match &plan {
                        RefinementPlan::Uniform => current.marking_res = w.num_cells(),
                        RefinementPlan::Marked(result) => current.record_marking(result),
                    }
                    observer.notify(&SolverEvent::Marked {
                        iteration: k,
                        residual_cells: current.marking_res,
                        projection_cells: current.marking_proj,
                        new_multiindices: current.marking_mi,
                    });
                    LoopState::Refine(plan)
                }
                LoopState::Refine(plan) => {
                    match plan {
                        RefinementPlan::Uniform => {
                            refine_uniformly(&mut w, None)?;
                        }
                        RefinementPlan::Marked(result) => {
                            refine(&mut w, &result.cell_markers(), &result.new_multiindices, None, |_| {
                                setup_vector(pde, &self.base_mesh, self.degree, None)
                            })?;
                        }
                    }
                    observer.notify(&SolverEvent::Refined {
                        iteration: k,
                        dofs: w.dim(),
                        active_indices: w.len(),
                    });
                    k += 1;
                    LoopState::Solve
                }
                LoopState::Converged => break Termination::Converged,
                LoopState::Exhausted(reason) => break Termination::Exhausted(reason),
            };
        };

        observer.notify(&SolverEvent::Terminated {
            iteration: k,
            termination,
        });

        Ok(SolverOutput {
            w,
            stats,
            history,
            termination,
        })
    }
}
