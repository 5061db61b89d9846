//! Preconditioned conjugate gradient over generic vector spaces.
use crate::multi_vector::MultiVector;
use crate::operator::{IdentityOperator, LinearOperator};
use crate::space::FunctionSpace;
use core::fmt;
use log::warn;
use nalgebra::{DVector, Matrix};
use std::error::Error;

/// The vector operations needed by conjugate gradient.
pub trait CgVector: Clone {
    fn dot(&self, other: &Self) -> f64;

    /// `self <- self + alpha * x`
    fn axpy(&mut self, alpha: f64, x: &Self);

    /// `self <- x + beta * self`
    fn scale_add(&mut self, beta: f64, x: &Self);

    fn set_zero(&mut self);
}

impl CgVector for DVector<f64> {
    fn dot(&self, other: &Self) -> f64 {
        Matrix::dot(self, other)
    }

    fn axpy(&mut self, alpha: f64, x: &Self) {
        Matrix::axpy(self, alpha, x, 1.0);
    }

    fn scale_add(&mut self, beta: f64, x: &Self) {
        Matrix::axpy(self, 1.0, x, beta);
    }

    fn set_zero(&mut self) {
        self.fill(0.0);
    }
}

impl<S: FunctionSpace> CgVector for MultiVector<S> {
    fn dot(&self, other: &Self) -> f64 {
        self.inner(other)
    }

    fn axpy(&mut self, alpha: f64, x: &Self) {
        MultiVector::axpy(self, alpha, x);
    }

    fn scale_add(&mut self, beta: f64, x: &Self) {
        self.scale(beta);
        MultiVector::axpy(self, 1.0, x);
    }

    fn set_zero(&mut self) {
        self.scale(0.0);
    }
}

pub trait CgStoppingCriterion {
    /// Decide convergence given the preconditioned norms of the right-hand side and the residual.
    fn has_converged(&self, b_norm: f64, iteration: usize, residual_norm: f64) -> bool;
}

/// Relative residual tolerance $\|r\|_P \leq \text{tol} \cdot \|b\|_P$, where
/// $\|r\|_P^2 = r^T P r$ is measured with the preconditioner.
///
/// Note that we use the *approximate* residual given by Conjugate-Gradient. For ill-conditioned
/// problems, it is possible that CG's residual converges, but the real residual does not.
#[derive(Debug, Clone, Copy)]
pub struct RelativeResidualCriterion {
    tol: f64,
}

impl RelativeResidualCriterion {
    pub fn new(tol: f64) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl CgStoppingCriterion for RelativeResidualCriterion {
    fn has_converged(&self, b_norm: f64, _iteration: usize, residual_norm: f64) -> bool {
        residual_norm <= self.tol * b_norm
    }
}

#[derive(Debug)]
pub struct ConjugateGradient<A, P, Criterion> {
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl ConjugateGradient<(), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl Default for ConjugateGradient<(), IdentityOperator, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, Criterion> ConjugateGradient<(), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<A, P, Criterion> {
        ConjugateGradient {
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

impl<A, P, Criterion> ConjugateGradient<A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<A, P2, Criterion> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    /// Stop after at most `max_iter` updates. Reaching the limit is not an error, see
    /// [`CgOutput::converged`].
    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<A, P> ConjugateGradient<A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(
        self,
        stopping_criterion: Criterion,
    ) -> ConjugateGradient<A, P, Criterion> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(eyre::Report),
    PreconditionerError(eyre::Report),
    IndefiniteOperator,
    IndefinitePreconditioner,
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {}", err),
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError {
    pub output: CgOutput,
    pub kind: SolveErrorKind,
}

impl SolveError {
    fn new(output: CgOutput, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG solve failed after {} iterations. ", self.output.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl Error for SolveError {}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct CgOutput {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector.
    pub num_iterations: usize,
    /// Preconditioned norm $\|r\|_P$ of the residual of the returned iterate.
    pub residual_norm: f64,
    /// Whether the stopping criterion was met before the iteration limit.
    pub converged: bool,
}

impl<A, P, Criterion> ConjugateGradient<A, P, Criterion>
where
    Criterion: CgStoppingCriterion,
{
    /// Solve $A x = b$, starting from the initial guess stored in `x`.
    #[allow(non_snake_case)]
    pub fn solve_with_guess<V>(&self, b: &V, x: &mut V) -> Result<CgOutput, SolveError>
    where
        V: CgVector,
        A: LinearOperator<V>,
        P: LinearOperator<V>,
    {
        use SolveErrorKind::*;

        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: 0.0,
            converged: false,
        };

        // P-norm of b
        let Pb = self
            .preconditioner
            .apply(b)
            .map_err(|err| SolveError::new(output.clone(), PreconditionerError(err)))?;
        let b_norm = Pb.dot(b).max(0.0).sqrt();

        if b_norm == 0.0 {
            x.set_zero();
            output.converged = true;
            return Ok(output);
        }

        // r = b - Ax
        let Ax = self
            .operator
            .apply(x)
            .map_err(|err| SolveError::new(output.clone(), OperatorError(err)))?;
        let mut r = b.clone();
        r.axpy(-1.0, &Ax);

        // z = Pr
        let mut z = self
            .preconditioner
            .apply(&r)
            .map_err(|err| SolveError::new(output.clone(), PreconditionerError(err)))?;

        // p = z
        let mut p = z.clone();
        let mut zTr = z.dot(&r);

        loop {
            output.residual_norm = zTr.max(0.0).sqrt();
            if self
                .stopping_criterion
                .has_converged(b_norm, output.num_iterations, output.residual_norm)
            {
                output.converged = true;
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    warn!(
                        "CG reached max iterations ({}) with residual norm {:.3e}",
                        max_iter, output.residual_norm
                    );
                    break;
                }
            }

            // Ap = A * p
            let Ap = self
                .operator
                .apply(&p)
                .map_err(|err| SolveError::new(output.clone(), OperatorError(err)))?;
            let pAp = p.dot(&Ap);

            if pAp <= 0.0 {
                return Err(SolveError::new(output, IndefiniteOperator));
            }
            if zTr <= 0.0 {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            let alpha = zTr / pAp;
            // x <- x + alpha * p
            x.axpy(alpha, &p);
            // r <- r - alpha * Ap
            r.axpy(-alpha, &Ap);

            // Number of iterations corresponds to number of updates to the x vector
            output.num_iterations += 1;

            // z <- P r
            z = self
                .preconditioner
                .apply(&r)
                .map_err(|err| SolveError::new(output.clone(), PreconditionerError(err)))?;
            let zTr_next = z.dot(&r);
            let beta = zTr_next / zTr;

            // p <- z + beta * p
            p.scale_add(beta, &z);

            zTr = zTr_next;
        }

        Ok(output)
    }
}

/// Solve $A w = b$ with preconditioner `p`, starting from `w0`.
///
/// Returns the final iterate, the preconditioned residual norm $\zeta$ and the number of
/// iterations. Reaching `maxiter` is reported through a large $\zeta$, not as an error.
pub fn pcg<V, A, P>(a: A, b: &V, p: P, w0: V, eps: f64, maxiter: usize) -> Result<(V, f64, usize), SolveError>
where
    V: CgVector,
    A: LinearOperator<V>,
    P: LinearOperator<V>,
{
    let mut w = w0;
    let output = ConjugateGradient::new()
        .with_operator(a)
        .with_preconditioner(p)
        .with_stopping_criterion(RelativeResidualCriterion::new(eps))
        .with_max_iter(maxiter)
        .solve_with_guess(b, &mut w)?;
    Ok((w, output.residual_norm, output.num_iterations))
}
