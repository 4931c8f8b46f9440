//! Corrected-variance transform of the basic error model.
//!
//! The targets rely on three primitive operations:
//! - the corrected sigma `σ'` of one observation, in `I/g` units
//! - its derivative with respect to `b`
//! - the corrected variance in `I` units (to apply a fitted model)
//!
//! The transform is `σ'² = a²(σ² + (b·I)²) / g²`.

use crate::domain::ErrorModelParams;

/// Corrected sigma of one observation in units of `I/g`.
pub fn corrected_sigma(params: &ErrorModelParams, variance: f64, intensity: f64, inverse_scale: f64) -> f64 {
    let bi = params.b * intensity;
    params.a * (variance + bi * bi).sqrt() / inverse_scale
}

/// `dσ'/db = b·I²·a² / (σ'·g²)`.
///
/// `sigmaprime` must be the value returned by [`corrected_sigma`] for the same inputs.
pub fn corrected_sigma_db(
    params: &ErrorModelParams,
    intensity: f64,
    inverse_scale: f64,
    sigmaprime: f64,
) -> f64 {
    params.b * intensity * intensity * params.a * params.a / (sigmaprime * inverse_scale * inverse_scale)
}

/// Corrected variance in intensity units: `a²(σ² + (b·I)²)`.
pub fn corrected_variance(params: &ErrorModelParams, variance: f64, intensity: f64) -> f64 {
    let bi = params.b * intensity;
    params.a * params.a * (variance + bi * bi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_params_leave_sigma_unchanged() {
        let p = ErrorModelParams::identity();
        assert_relative_eq!(corrected_sigma(&p, 16.0, 250.0, 1.0), 4.0);
        assert_relative_eq!(corrected_sigma(&p, 16.0, 250.0, 2.0), 2.0);
        assert_relative_eq!(corrected_variance(&p, 16.0, 250.0), 16.0);
    }

    #[test]
    fn sigma_derivative_matches_central_difference() {
        let p = ErrorModelParams::new(1.3, 0.04);
        let (var, i, g) = (25.0, 480.0, 0.9);
        let h = 1e-7;
        let up = corrected_sigma(&ErrorModelParams::new(p.a, p.b + h), var, i, g);
        let down = corrected_sigma(&ErrorModelParams::new(p.a, p.b - h), var, i, g);
        let sigma = corrected_sigma(&p, var, i, g);
        assert_relative_eq!(
            corrected_sigma_db(&p, i, g, sigma),
            (up - down) / (2.0 * h),
            max_relative = 1e-6
        );
    }

    #[test]
    fn sigma_is_consistent_with_variance() {
        let p = ErrorModelParams::new(1.2, 0.03);
        let sigma = corrected_sigma(&p, 9.0, 100.0, 1.0);
        assert_relative_eq!(sigma * sigma, corrected_variance(&p, 9.0, 100.0), max_relative = 1e-12);
    }
}
