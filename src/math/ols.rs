//! Small dense linear solves.
//!
//! The refiner repeatedly solves tiny systems of the form:
//!
//! ```text
//! H Δ = -g
//! ```
//!
//! where `H` is a finite-difference Hessian with one or two columns. The same
//! routine also serves closed-form least-squares estimates.
//!
//! Implementation choices:
//! - We use SVD so that a nearly singular `H` (e.g. a flat direction) yields
//!   `None` instead of an enormous step.
//! - Tolerances are relaxed progressively before giving up.

use nalgebra::{DMatrix, DVector};

/// Solve a (possibly non-square) least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() != y.len() || x.ncols() == 0 {
        return None;
    }
    let scale = x.amax();
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol * scale) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
