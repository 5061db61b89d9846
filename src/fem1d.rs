//! A piecewise linear finite element backend for diffusion problems on an interval.
//!
//! This is the reference implementation of [`FunctionSpace`](crate::space::FunctionSpace) and
//! [`FemDiscretisation`](crate::space::FemDiscretisation) used throughout the test suite.
mod function;
mod mesh;
mod poisson;
mod space;

pub use function::*;
pub use mesh::*;
pub use poisson::*;
pub use space::*;
