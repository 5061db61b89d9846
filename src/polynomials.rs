//! Orthonormal polynomial families and their three-term recurrences.
//!
//! For an orthonormal family $(p_n)$ we use the recurrence (Gautschi's notation)
//!
//! $$ \beta_{n+1} p_{n+1}(x) = (x - \alpha_n) p_n(x) - \beta_n p_{n-1}(x), $$
//!
//! with $p_{-1} = 0$ and $p_0 = 1$. Equivalently, in three-coefficient form,
//!
//! $$ p_{n+1}(x) = (a_n + b_n x) p_n(x) - c_n p_{n-1}(x), $$
//!
//! where $a_n = -\alpha_n / \beta_{n+1}$, $b_n = 1 / \beta_{n+1}$ and $c_n = \beta_n / \beta_{n+1}$.
//!
//! The stochastic Galerkin operator needs the multiplication-by-$x$ rule
//!
//! $$ x p_n = \tfrac{1}{b_n} p_{n+1} - \tfrac{a_n}{b_n} p_n + \tfrac{c_n}{b_n} p_{n-1}, $$
//!
//! whose coefficients are returned by [`PolynomialFamily::get_beta`].
use serde::{Deserialize, Serialize};

/// Coefficients of $x p_n = \text{next}\, p_{n+1} - \text{center}\, p_n + \text{previous}\, p_{n-1}$.
///
/// In terms of the three-term recurrence coefficients this is
/// `(center, next, previous) = (a_n / b_n, 1 / b_n, c_n / b_n)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beta {
    pub center: f64,
    pub next: f64,
    pub previous: f64,
}

/// Recurrence coefficients $(a_n, b_n, c_n)$ of $p_{n+1} = (a_n + b_n x) p_n - c_n p_{n-1}$.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecurrenceCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Families of orthonormal polynomials with respect to a probability measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PolynomialFamily {
    /// Legendre polynomials, orthonormal with respect to the uniform distribution on `[a, b]`.
    Legendre { a: f64, b: f64 },
    /// Probabilists' Hermite polynomials, orthonormal with respect to $N(\mu, \sigma^2)$.
    Hermite { mu: f64, sigma: f64 },
}

impl PolynomialFamily {
    /// The Gautschi coefficients $(\alpha_n, \beta_n)$, with $\beta_0 = 0$.
    fn gautschi(&self, n: u32) -> (f64, f64) {
        let nf = f64::from(n);
        match *self {
            Self::Legendre { a, b } => {
                let center = 0.5 * (a + b);
                let half_width = 0.5 * (b - a);
                let beta = if n > 0 {
                    half_width * nf / (4.0 * nf * nf - 1.0).sqrt()
                } else {
                    0.0
                };
                (center, beta)
            }
            Self::Hermite { mu, sigma } => (mu, sigma * nf.sqrt()),
        }
    }

    /// The three-term recurrence coefficients $(a_n, b_n, c_n)$.
    pub fn recurrence_coefficients(&self, n: u32) -> RecurrenceCoefficients {
        let (alpha_n, beta_n) = self.gautschi(n);
        let (_, beta_next) = self.gautschi(n + 1);
        RecurrenceCoefficients {
            a: -alpha_n / beta_next,
            b: 1.0 / beta_next,
            c: beta_n / beta_next,
        }
    }

    /// Coefficients of the multiplication-by-$x$ rule for $p_n$.
    pub fn get_beta(&self, n: u32) -> Beta {
        let RecurrenceCoefficients { a, b, c } = self.recurrence_coefficients(n);
        Beta {
            center: a / b,
            next: 1.0 / b,
            previous: c / b,
        }
    }

    /// Evaluate $p_n(x)$.
    pub fn eval(&self, n: u32, x: f64) -> f64 {
        let mut p_prev = 0.0;
        let mut p = 1.0;
        for k in 0..n {
            let RecurrenceCoefficients { a, b, c } = self.recurrence_coefficients(k);
            let p_next = (a + b * x) * p - c * p_prev;
            p_prev = p;
            p = p_next;
        }
        p
    }
}
