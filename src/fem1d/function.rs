use crate::coefficient_field::CoefficientField;
use crate::random_variable::RandomVariable;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// A scalar function on the real line with its derivative.
pub trait SpatialFunction: fmt::Debug + Send + Sync {
    fn value(&self, x: f64) -> f64;

    fn derivative(&self, x: f64) -> f64;
}

/// Shared handle to a spatial function, as stored in coefficient fields.
pub type Function = Arc<dyn SpatialFunction>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f64);

impl SpatialFunction for Constant {
    fn value(&self, _x: f64) -> f64 {
        self.0
    }

    fn derivative(&self, _x: f64) -> f64 {
        0.0
    }
}

/// $x \mapsto A \cos(2 \pi k x)$.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineMode {
    pub amplitude: f64,
    pub frequency: f64,
}

impl SpatialFunction for CosineMode {
    fn value(&self, x: f64) -> f64 {
        self.amplitude * (2.0 * PI * self.frequency * x).cos()
    }

    fn derivative(&self, x: f64) -> f64 {
        -2.0 * PI * self.frequency * self.amplitude * (2.0 * PI * self.frequency * x).sin()
    }
}

/// A function given by closures for its value and derivative.
pub struct FnFunction<F, G> {
    value: F,
    derivative: G,
}

impl<F, G> FnFunction<F, G>
where
    F: Fn(f64) -> f64 + Send + Sync,
    G: Fn(f64) -> f64 + Send + Sync,
{
    pub fn new(value: F, derivative: G) -> Self {
        Self { value, derivative }
    }
}

impl<F, G> fmt::Debug for FnFunction<F, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction").finish_non_exhaustive()
    }
}

impl<F, G> SpatialFunction for FnFunction<F, G>
where
    F: Fn(f64) -> f64 + Send + Sync,
    G: Fn(f64) -> f64 + Send + Sync,
{
    fn value(&self, x: f64) -> f64 {
        (self.value)(x)
    }

    fn derivative(&self, x: f64) -> f64 {
        (self.derivative)(x)
    }
}

pub fn constant(value: f64) -> Function {
    Arc::new(Constant(value))
}

pub fn from_fn<F, G>(value: F, derivative: G) -> Function
where
    F: Fn(f64) -> f64 + Send + Sync + 'static,
    G: Fn(f64) -> f64 + Send + Sync + 'static,
{
    Arc::new(FnFunction::new(value, derivative))
}

/// A coefficient field with constant mean and cosine modes of algebraically decaying amplitude,
///
/// $$ a(x, y) = \overline{a} + \sum_{m=0}^{M-1} A (m + 1)^{-\sigma} \cos(2 \pi (m + 1) x) y_m. $$
///
/// The field is uniformly positive for $y_m \in [-1, 1]$ as long as
/// $A \sum_m (m + 1)^{-\sigma} < \overline{a}$.
pub fn cosine_expansion(
    mean: f64,
    amplitude: f64,
    decay: f64,
    num_terms: usize,
    rv: RandomVariable,
) -> CoefficientField<Function> {
    let terms = (0..num_terms)
        .map(|m| {
            let mode = CosineMode {
                amplitude: amplitude * ((m + 1) as f64).powf(-decay),
                frequency: (m + 1) as f64,
            };
            (Arc::new(mode) as Function, rv)
        })
        .collect();
    CoefficientField::new(constant(mean), terms)
}
