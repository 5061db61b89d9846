use crate::{constant_field, multi_mesh_vector, unit_load_problem};
use sgfem::adaptive::prepare_rhs;
use sgfem::nalgebra::{DMatrix, DVector};
use sgfem::operator::{AssemblyType, IdentityOperator, LinearOperator, MultiOperator, PreconditioningOperator};
use sgfem::pcg::{pcg, ConjugateGradient, RelativeResidualCriterion, SolveErrorKind};
use std::sync::Arc;
use util::assert_approx_matrix_eq;

#[test]
fn solve_identity() {
    let operator = IdentityOperator;
    let mut x = DVector::zeros(4);
    let b = DVector::from_element(4, 5.0);
    ConjugateGradient::new()
        .with_operator(operator)
        .with_stopping_criterion(RelativeResidualCriterion::default())
        .solve_with_guess(&b, &mut x)
        .unwrap();
    assert_eq!(x, b);
}

#[test]
fn solve_arbitrary() {
    // Use an arbitrary symmetric, positive definite matrix (diagonally dominant in this case)
    // and the identity preconditioner
    let a = DMatrix::from_fn(3, 3, |r, c| if r == c { 7.0 } else { 2.0 });

    let x0 = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
    let b = &a * &x0;
    let mut x = DVector::zeros(3);
    let output = ConjugateGradient::new()
        .with_operator(&a)
        .with_stopping_criterion(RelativeResidualCriterion::new(1e-14))
        .solve_with_guess(&b, &mut x)
        .unwrap();

    assert!(output.converged);
    assert!(output.num_iterations > 0 && output.num_iterations <= 3);
    assert_approx_matrix_eq!(&x, &x0, abstol = 1e-12);
}

#[test]
fn solve_arbitrary_preconditioned() {
    // Take some arbitrary positive definite matrices as system matrix and preconditioner
    let a = DMatrix::from_row_slice(3, 3, &[21.0, -1.0, -5.0, -1.0, 11.0, -4.0, -5.0, -4.0, 26.0]);
    let p = DMatrix::from_row_slice(3, 3, &[17.0, 6.0, 3.0, 6.0, 14.0, 9.0, 3.0, 9.0, 10.0]);
    let x0 = DVector::from_column_slice(&[1.0, 3.0, 2.0]);
    let b = &a * &x0;

    // Arbitrary initial guess
    let mut x = DVector::from_column_slice(&[2.0, 1.0, 0.0]);
    let output = ConjugateGradient::new()
        .with_operator(&a)
        .with_preconditioner(&p)
        .with_stopping_criterion(RelativeResidualCriterion::new(1e-12))
        .solve_with_guess(&b, &mut x)
        .unwrap();

    // CG converges in exact arithmetic in at most n iterations for an n x n matrix
    assert!(output.num_iterations >= 3 && output.num_iterations <= 4);
    assert_approx_matrix_eq!(&x, &x0, abstol = 1e-10);
}

#[test]
fn zero_rhs_gives_zero_solution() {
    let a = DMatrix::from_fn(3, 3, |r, c| if r == c { 4.0 } else { 1.0 });
    let w0 = DVector::from_element(3, 1.0);
    let (w, zeta, iterations) = pcg(&a, &DVector::zeros(3), IdentityOperator, w0, 1e-8, 10).unwrap();
    assert_eq!(w, DVector::zeros(3));
    assert_eq!(zeta, 0.0);
    assert_eq!(iterations, 0);
}

#[test]
fn iteration_limit_is_not_an_error() {
    let a = DMatrix::from_fn(6, 6, |r, c| if r == c { 4.0 + r as f64 } else { 1.0 });
    let b = DVector::from_fn(6, |i, _| i as f64 + 1.0);
    let mut x = DVector::zeros(6);
    let output = ConjugateGradient::new()
        .with_operator(&a)
        .with_stopping_criterion(RelativeResidualCriterion::new(1e-14))
        .with_max_iter(2)
        .solve_with_guess(&b, &mut x)
        .unwrap();
    assert!(!output.converged);
    assert_eq!(output.num_iterations, 2);
    assert!(output.residual_norm > 0.0);
}

#[test]
fn resolving_converged_solution_is_idempotent() {
    let a = DMatrix::from_fn(4, 4, |r, c| if r == c { 10.0 } else { 1.0 / (1.0 + (r + c) as f64) });
    let b = DVector::from_column_slice(&[1.0, -2.0, 0.5, 3.0]);
    let (w, _, _) = pcg(&a, &b, IdentityOperator, DVector::zeros(4), 1e-13, 50).unwrap();
    let (w2, _, iterations) = pcg(&a, &b, IdentityOperator, w.clone(), 1e-8, 50).unwrap();
    assert_eq!(iterations, 0);
    assert_eq!(w, w2);
}

#[test]
fn indefinite_operator_is_detected() {
    let a = DMatrix::from_diagonal(&DVector::from_column_slice(&[1.0, -1.0]));
    let b = DVector::from_column_slice(&[1.0, 1.0]);
    let err = pcg(&a, &b, IdentityOperator, DVector::zeros(2), 1e-8, 10).unwrap_err();
    assert!(matches!(err.kind, SolveErrorKind::IndefiniteOperator));
    assert_eq!(err.output.num_iterations, 0);
}

#[test]
fn operator_errors_are_propagated() {
    let a = DMatrix::from_element(3, 3, 1.0);
    let b = DVector::from_element(2, 1.0);
    let err = pcg(&a, &b, IdentityOperator, DVector::zeros(2), 1e-8, 10).unwrap_err();
    assert!(matches!(err.kind, SolveErrorKind::OperatorError(_)));
}

#[test]
fn solve_stochastic_galerkin_system_on_independent_meshes() {
    let pde = Arc::new(unit_load_problem());
    let field = Arc::new(constant_field(2.0, &[0.6, 0.3]));
    let w0 = multi_mesh_vector().zeros_like();
    let operator = MultiOperator::new(field.clone(), pde.clone(), AssemblyType::JointMu);
    let preconditioner = PreconditioningOperator::new(pde.as_ref(), field.mean_func(), &w0).unwrap();
    let b = prepare_rhs(&w0, field.as_ref(), pde.as_ref()).unwrap();

    let (w, zeta, iterations) = pcg(&operator, &b, &preconditioner, w0, 1e-10, 200).unwrap();
    assert!(iterations > 0 && iterations < 200);

    let mut residual = b.clone();
    residual.axpy(-1.0, &operator.apply(&w).unwrap());
    assert!(residual.norm() <= 1e-6 * b.norm());
    assert!(zeta >= 0.0);

    // The mean dominates and the uniform measure is symmetric, so higher modes are smaller
    let mean_norm = w[&crate::mi(&[])].coeffs.norm();
    assert!(mean_norm > 0.0);
    assert!(w[&crate::mi(&[1])].coeffs.norm() < mean_norm);

    // Starting from the converged solution no further iterations are needed
    let (w2, _, iterations) = pcg(&operator, &b, &preconditioner, w.clone(), 1e-6, 200).unwrap();
    assert_eq!(iterations, 0);
    assert_eq!(w2, w);
}
