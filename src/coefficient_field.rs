//! Affine expansion of a random diffusion coefficient.
//!
//! The coefficient is represented as
//!
//! $$ a(x, y) = \overline{a}(x) + \sum_{m \geq 0} a_m(x) y_m, $$
//!
//! where each $y_m$ is distributed according to a [`RandomVariable`]. The type of the spatial
//! functions is left to the finite element backend.
use crate::random_variable::RandomVariable;
use log::warn;
use std::ops::Index;

#[derive(Debug, Clone)]
pub struct CoefficientField<F> {
    mean: F,
    terms: Vec<(F, RandomVariable)>,
}

impl<F> CoefficientField<F> {
    pub fn new(mean: F, terms: Vec<(F, RandomVariable)>) -> Self {
        Self { mean, terms }
    }

    /// The mean coefficient $\overline{a}$.
    pub fn mean_func(&self) -> &F {
        &self.mean
    }

    /// Number of stochastic terms in the expansion.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn get(&self, m: usize) -> Option<(&F, &RandomVariable)> {
        self.terms.get(m).map(|(f, rv)| (f, rv))
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (&F, &RandomVariable)> {
        self.terms.iter().map(|(f, rv)| (f, rv))
    }

    /// Clamp the number of requested dimensions to the length of the expansion.
    ///
    /// A warning is logged when the expansion is too short, since terms are then silently
    /// dropped from the computation.
    pub fn truncate_dimensions(&self, maxm: usize) -> usize {
        if self.len() < maxm {
            warn!(
                "insufficient length of coefficient field ({} instead of {}), truncating",
                self.len(),
                maxm
            );
            self.len()
        } else {
            maxm
        }
    }
}

impl<F> Index<usize> for CoefficientField<F> {
    type Output = (F, RandomVariable);

    fn index(&self, m: usize) -> &Self::Output {
        &self.terms[m]
    }
}
