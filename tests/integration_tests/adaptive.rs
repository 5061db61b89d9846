use crate::integration_tests::unit_load_solver;
use matrixcompare::assert_scalar_eq;
use sgfem::adaptive::{
    pcg_solve, setup_vector, ConfigurationError, ExhaustionReason, RefinementToggles, SimulationStats,
    SolverParameters, Termination,
};
use sgfem::coefficient_field::CoefficientField;
use sgfem::fem1d::{constant, IntervalMesh, Poisson1d};
use sgfem::multi_vector::MultiVector;
use sgfem::multiindex::MultiIndex;
use sgfem::observer::{RecordingObserver, ResourceProbe, SolverEvent};
use sgfem::operator::{AssemblyType, MultiOperator};
use sgfem::space::FunctionSpace;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn mean_only() -> Vec<MultiIndex> {
    vec![MultiIndex::zero()]
}

/// The mean and the first two linear modes, in multi-index order.
fn first_order() -> Vec<MultiIndex> {
    vec![MultiIndex::zero(), MultiIndex::unit(1), MultiIndex::unit(0)]
}

fn count_events(observer: &RecordingObserver, predicate: impl Fn(&SolverEvent) -> bool) -> usize {
    observer.events.iter().filter(|event| predicate(event)).count()
}

#[test]
fn zero_refinements_yield_single_record() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 0,
        error_eps: 0.0,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let mut observer = RecordingObserver::default();
    let output = solver
        .run_with_observer(w, Vec::new(), Some(Vec::new()), &mut observer)
        .unwrap();

    assert_eq!(output.termination, Termination::Exhausted(ExhaustionReason::Refinements));
    assert_eq!(output.stats.len(), 1);
    assert_eq!(output.history.as_ref().map(Vec::len), Some(1));
    assert_eq!(count_events(&observer, |e| matches!(e, SolverEvent::Marked { .. })), 0);
    assert_eq!(count_events(&observer, |e| matches!(e, SolverEvent::Refined { .. })), 0);
    assert!(matches!(
        observer.events.last(),
        Some(SolverEvent::Terminated {
            iteration: 0,
            termination: Termination::Exhausted(ExhaustionReason::Refinements)
        })
    ));

    let stats = &output.stats[0];
    assert_eq!(stats.dofs, 3 * 5);
    assert_eq!(stats.cells, 3 * 4);
    assert_eq!(stats.active_indices(), first_order());
    assert!(stats.xi > 0.0);
    assert!(stats.pcg_iterations > 0);
    assert_eq!(stats.marking_res, 0);
}

#[test]
fn mean_solution_matches_deterministic_problem() {
    // With a single active index the stochastic terms do not couple
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 0,
        pcg_eps: 1e-12,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&mean_only()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();
    assert!(output.history.is_none());

    let component = &output.w[&MultiIndex::zero()];
    for (&x, &u) in component.space.mesh().vertices().iter().zip(component.coeffs.iter()) {
        // Nodally exact solution of -2 u'' = 1
        assert_scalar_eq!(u, 0.25 * x * (1.0 - x), comp = abs, tol = 1e-10);
    }
}

#[test]
fn refinement_increases_degrees_of_freedom() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 3,
        error_eps: 0.0,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let mut observer = RecordingObserver::default();
    let output = solver
        .run_with_observer(w, Vec::new(), None, &mut observer)
        .unwrap();

    assert_eq!(output.termination, Termination::Exhausted(ExhaustionReason::Refinements));
    assert_eq!(output.stats.len(), 4);
    for pair in output.stats.windows(2) {
        assert!(pair[1].dofs > pair[0].dofs);
        assert!(pair[0].marking_res > 0);
    }
    assert_eq!(output.w.dim(), output.stats[3].dofs);
    assert_eq!(count_events(&observer, |e| matches!(e, SolverEvent::Marked { .. })), 3);
    assert_eq!(count_events(&observer, |e| matches!(e, SolverEvent::IterationStarted { .. })), 4);
    // Multi-index activation is disabled by default
    assert!(output.stats.iter().all(|s| s.active_indices() == first_order()));
}

#[test]
fn disabled_refinement_keeps_discretisation() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 3,
        error_eps: 0.0,
        do_refinement: RefinementToggles::none(),
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();

    assert_eq!(output.stats.len(), 4);
    let first = &output.stats[0];
    for stats in &output.stats[1..] {
        assert_eq!(stats.dofs, first.dofs);
        assert_eq!(stats.multiindices, first.multiindices);
        assert!((stats.xi - first.xi).abs() <= 1e-4 * first.xi);
    }
}

#[test]
fn multiindex_refinement_activates_largest_candidate() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 1,
        error_eps: 0.0,
        do_refinement: RefinementToggles {
            residual: false,
            projection: false,
            multiindex: true,
        },
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&mean_only()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();

    assert_eq!(output.stats[0].marking_mi, 1);
    assert_eq!(output.stats[1].active_indices(), vec![MultiIndex::zero(), MultiIndex::unit(0)]);
    // New components start on the base mesh
    assert_eq!(output.w[&MultiIndex::unit(0)].space.num_cells(), 4);
}

#[test]
fn dof_budget_stops_refinement() {
    let solver = unit_load_solver(SolverParameters {
        max_dof: 10.0,
        error_eps: 0.0,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();
    assert_eq!(output.termination, Termination::Exhausted(ExhaustionReason::Dofs));
    assert_eq!(output.stats.len(), 1);
    let stats = &output.stats[0];
    assert_eq!((stats.marking_res, stats.marking_proj, stats.marking_mi), (0, 0, 0));
}

#[test]
fn convergence_on_final_iteration_is_reported() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 0,
        error_eps: 1e6,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&mean_only()).unwrap();
    let mut observer = RecordingObserver::default();
    let output = solver
        .run_with_observer(w, Vec::new(), None, &mut observer)
        .unwrap();
    assert_eq!(output.termination, Termination::Converged);
    assert_eq!(output.stats.len(), 1);
    assert_eq!(count_events(&observer, |e| matches!(e, SolverEvent::Marked { .. })), 0);
}

#[test]
fn dof_budget_on_final_iteration_is_reported() {
    for error_eps in [0.0, 1e6] {
        let solver = unit_load_solver(SolverParameters {
            max_refinements: 0,
            max_dof: 1.0,
            error_eps,
            ..SolverParameters::default()
        });
        let w = solver.initial_vector(&mean_only()).unwrap();
        let output = solver.run(w, Vec::new(), None).unwrap();
        assert_eq!(output.termination, Termination::Exhausted(ExhaustionReason::Dofs));
        assert_eq!(output.stats.len(), 1);
    }
}

#[test]
fn convergence_after_last_refinement_is_reported() {
    let params = SolverParameters {
        max_refinements: 1,
        error_eps: 0.0,
        do_uniform_refinement: true,
        ..SolverParameters::default()
    };
    let solver = unit_load_solver(params.clone());
    let w = solver.initial_vector(&first_order()).unwrap();
    let reference = solver.run(w, Vec::new(), None).unwrap();
    assert_eq!(reference.stats.len(), 2);
    let (xi0, xi1) = (reference.stats[0].xi, reference.stats[1].xi);
    assert!(xi1 < xi0);

    // A tolerance between the two estimates is met only by the final solution
    let solver = unit_load_solver(SolverParameters {
        error_eps: 0.5 * (xi0 + xi1),
        ..params
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();
    assert_eq!(output.termination, Termination::Converged);
    assert_eq!(output.stats.len(), 2);
}

#[test]
fn loose_tolerance_converges_immediately() {
    let solver = unit_load_solver(SolverParameters {
        error_eps: 1e6,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();
    assert_eq!(output.termination, Termination::Converged);
    assert_eq!(output.stats.len(), 1);
}

#[test]
fn stop_flag_cancels_after_estimate() {
    let flag = Arc::new(AtomicBool::new(true));
    let solver = unit_load_solver(SolverParameters {
        error_eps: 0.0,
        ..SolverParameters::default()
    })
    .with_stop_flag(flag);
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();
    assert_eq!(output.termination, Termination::Exhausted(ExhaustionReason::Cancelled));
    assert_eq!(output.stats.len(), 1);
    assert!(output.stats[0].xi > 0.0);
}

#[test]
fn resuming_replaces_last_record() {
    let params = SolverParameters {
        max_refinements: 1,
        error_eps: 0.0,
        ..SolverParameters::default()
    };
    let solver = unit_load_solver(params.clone());
    let w = solver.initial_vector(&first_order()).unwrap();
    let first = solver.run(w, Vec::new(), Some(Vec::new())).unwrap();
    assert_eq!(first.stats.len(), 2);

    let solver = unit_load_solver(SolverParameters {
        max_refinements: 2,
        ..params
    });
    let resumed = solver
        .run(first.w.clone(), first.stats.clone(), first.history.clone())
        .unwrap();
    assert_eq!(resumed.stats.len(), 3);
    assert_eq!(resumed.history.as_ref().map(Vec::len), Some(3));
    assert_eq!(resumed.stats[0], first.stats[0]);
    assert_eq!(resumed.stats[1].dofs, first.stats[1].dofs);
    assert_eq!(resumed.stats[1].multiindices, first.stats[1].multiindices);
    assert!(resumed.stats[2].dofs > resumed.stats[1].dofs);
}

#[test]
fn resuming_with_misaligned_history_is_rejected() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 1,
        error_eps: 0.0,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let first = solver.run(w, Vec::new(), Some(Vec::new())).unwrap();
    let mut history = first.history.clone().unwrap();
    history.pop();

    let err = solver
        .run(first.w.clone(), first.stats.clone(), Some(history))
        .unwrap_err();
    assert!(err.to_string().contains("history"));
    assert!(solver.run(first.w, first.stats, None).is_ok());
}

#[test]
fn invalid_parameters_are_rejected() {
    let solver = unit_load_solver(SolverParameters {
        gamma: 1.0,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&mean_only()).unwrap();
    let err = solver.run(w, Vec::new(), None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigurationError>(),
        Some(ConfigurationError::InvalidParameter { name: "gamma", .. })
    ));

    let solver = unit_load_solver(SolverParameters::default());
    let err = solver.run(MultiVector::new(), Vec::new(), None).unwrap_err();
    assert_eq!(err.downcast_ref::<ConfigurationError>(), Some(&ConfigurationError::EmptyActiveSet));
    assert!(solver.initial_vector(&[]).is_err());
}

#[test]
fn memory_is_recorded_through_probe() {
    struct FixedProbe;

    impl ResourceProbe for FixedProbe {
        fn memory_usage(&self) -> Option<f64> {
            Some(42.0)
        }
    }

    let solver = unit_load_solver(SolverParameters {
        max_refinements: 0,
        ..SolverParameters::default()
    })
    .with_resource_probe(Box::new(FixedProbe));
    let w = solver.initial_vector(&mean_only()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();
    assert_eq!(output.stats[0].memory, Some(42.0));
}

#[test]
fn statistics_serialize_with_record_keys() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 1,
        error_eps: 0.0,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();

    let value = serde_json::to_value(&output.stats[0]).unwrap();
    for key in [
        "TIME-PCG",
        "TIME-ESTIMATOR",
        "TIME-MARKING",
        "TIME-RESIDUAL",
        "TIME-PROJECTION",
        "TIME-MI",
        "EST",
        "RES-PART",
        "PROJ-PART",
        "PCG-PART",
        "ERR-RES",
        "ERR-PROJ",
        "ERR-PCG",
        "RES-mu",
        "PROJ-mu",
        "PROJ-MAX-ZETA",
        "PROJ-MAX-INACTIVE-ZETA",
        "PROJ-INACTIVE-ZETA",
        "MARKING-RES",
        "MARKING-PROJ",
        "MARKING-MI",
        "MI",
        "DOFS",
        "CELLS",
        "PCG-ITERATIONS",
        "ZETA",
        "RESIDUAL-L2",
        "RESIDUAL-H1",
        "MEMORY",
    ] {
        assert!(value.get(key).is_some(), "missing key {}", key);
    }
    assert_eq!(value["DOFS"], output.stats[0].dofs);
    assert_eq!(value["MI"], serde_json::json!([[[], 5], [[0, 1], 5], [[1], 5]]));

    let parsed: SimulationStats = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.dofs, output.stats[0].dofs);
    assert_eq!(parsed.multiindices, output.stats[0].multiindices);
    assert_eq!(parsed.res_mu.len(), 3);
}

#[test]
fn parameters_deserialize_with_defaults() {
    let json = r#"{
        "theta_eta": 0.6,
        "cQ": 2.0,
        "max_Lambda_frac": 0.3,
        "do_refinement": { "RES": true, "PROJ": false, "MI": true }
    }"#;
    let params: SolverParameters = serde_json::from_str(json).unwrap();
    assert_eq!(params.theta_eta, 0.6);
    assert_eq!(params.c_q, 2.0);
    assert_eq!(params.max_lambda_frac, 0.3);
    assert!(!params.do_refinement.projection);
    assert!(params.do_refinement.multiindex);
    assert_eq!(params.gamma, SolverParameters::default().gamma);
    assert!(params.validate().is_ok());
}

#[test]
fn pcg_solve_from_setup_vectors() {
    let pde = Arc::new(Poisson1d::homogeneous_dirichlet((0.0, 1.0), Some(constant(1.0))));
    let field = Arc::new(CoefficientField::new(constant(1.0), Vec::new()));
    let mesh = IntervalMesh::uniform(0.0, 1.0, 1).unwrap();
    let component = setup_vector(pde.as_ref(), &mesh, 1, Some(0.3)).unwrap();
    assert_eq!(component.space.num_cells(), 4);
    assert!(setup_vector(pde.as_ref(), &mesh, 1, Some(0.0)).is_err());

    let w: MultiVector<_> = vec![(MultiIndex::zero(), component)].into_iter().collect();
    let operator = MultiOperator::new(field, pde, AssemblyType::JointMu);
    let solution = pcg_solve(&operator, &w, 1e-12, 50).unwrap();
    assert!(solution.output.converged);
    assert!(solution.residual_l2 < 1e-10);
    assert!(solution.residual_h1 < 1e-8);
    assert_scalar_eq!(solution.w[&MultiIndex::zero()].coeffs[2], 0.125, comp = abs, tol = 1e-12);
}

#[test]
fn uniform_refinement_bisects_every_cell() {
    let solver = unit_load_solver(SolverParameters {
        max_refinements: 1,
        error_eps: 0.0,
        do_uniform_refinement: true,
        ..SolverParameters::default()
    });
    let w = solver.initial_vector(&first_order()).unwrap();
    let output = solver.run(w, Vec::new(), None).unwrap();

    assert_eq!(output.stats.len(), 2);
    assert_eq!(output.stats[0].marking_res, 12);
    assert_eq!(output.stats[1].cells, 24);
    assert_eq!(output.stats[1].dofs, 3 * 9);
    assert!(output.w.iter().all(|(_, c)| c.space.num_cells() == 8));
}
