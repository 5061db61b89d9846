//! Adaptive stochastic Galerkin finite element methods.
//!
//! The solution of an elliptic PDE with a random coefficient field
//! $a(x, y) = a_0(x) + \sum_m a_m(x) y_m$ is approximated in a tensor product of finite element
//! spaces and orthonormal polynomials in the random parameters $y$. Every active multi-index
//! carries its own finite element space, and the adaptive loop in [`adaptive`] refines the
//! meshes and enlarges the set of active multi-indices based on a residual error estimator.
pub mod adaptive;
pub mod coefficient_field;
pub mod estimator;
pub mod fem1d;
pub mod marking;
pub mod multi_vector;
pub mod multiindex;
pub mod observer;
pub mod operator;
pub mod pcg;
pub mod polynomials;
pub mod quadrature;
pub mod random_variable;
pub mod space;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
