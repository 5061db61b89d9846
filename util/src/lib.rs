use nalgebra::DVector;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Relative difference `|x - y| / max(|x|, |y|)` in the Euclidean norm.
///
/// Returns zero if both vectors vanish.
pub fn relative_difference(x: &DVector<f64>, y: &DVector<f64>) -> f64 {
    assert_eq!(x.len(), y.len(), "Vectors must have the same length.");
    let scale = x.norm().max(y.norm());
    if scale == 0.0 {
        0.0
    } else {
        (x - y).norm() / scale
    }
}
