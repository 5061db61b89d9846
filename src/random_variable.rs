//! Random variables parametrizing the coefficient expansion.
use crate::polynomials::PolynomialFamily;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RandomVariable {
    /// Uniform distribution on `[a, b]`.
    Uniform { a: f64, b: f64 },
    /// Normal distribution $N(\mu, \sigma^2)$.
    Normal { mu: f64, sigma: f64 },
}

impl RandomVariable {
    /// The uniform distribution on `[-1, 1]`, the standard choice for affine coefficient fields.
    pub fn standard_uniform() -> Self {
        Self::Uniform { a: -1.0, b: 1.0 }
    }

    pub fn standard_normal() -> Self {
        Self::Normal { mu: 0.0, sigma: 1.0 }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Self::Uniform { a, b } => 0.5 * (a + b),
            Self::Normal { mu, .. } => mu,
        }
    }

    pub fn variance(&self) -> f64 {
        match *self {
            Self::Uniform { a, b } => (b - a).powi(2) / 12.0,
            Self::Normal { sigma, .. } => sigma * sigma,
        }
    }

    /// The family of polynomials orthonormal with respect to the law of this random variable.
    pub fn orth_polys(&self) -> PolynomialFamily {
        match *self {
            Self::Uniform { a, b } => PolynomialFamily::Legendre {
                a: a.min(b),
                b: a.max(b),
            },
            Self::Normal { mu, sigma } => PolynomialFamily::Hermite { mu, sigma },
        }
    }
}
