//! Binned variance target for `b`.
//!
//! Each bin contributes `[(0.5 − v)² + 1/v − 1.25]·w/Σw`, where `v` is the
//! variance of the normalized deviations in the bin. The bracket is zero with
//! zero slope at `v = 1` and positive elsewhere, so minimizing over `b` pushes
//! every bin towards unit variance. `a` stays fixed at construction.
//!
//! Bin statistics depend on the parameters, so [`progress`] must run before
//! residuals are read. Reading them for a different `b` is a
//! [`TargetError::StaleBins`] error rather than a silently wrong value.
//!
//! [`progress`]: ErrorModelTarget::progress

use nalgebra::DVector;

use crate::data::binner::VarianceBinner;
use crate::domain::{ErrorModelParams, ParamName, ParameterState};
use crate::error::TargetError;
use crate::models::corrected_sigma_db;
use crate::targets::ErrorModelTarget;

/// Per-bin loss before weighting.
pub fn bin_loss(variance: f64) -> f64 {
    (0.5 - variance).powi(2) + 1.0 / variance - 1.25
}

/// `d(bin_loss)/dv`.
pub fn bin_loss_derivative(variance: f64) -> f64 {
    -2.0 * (0.5 - variance + 1.0 / (2.0 * variance * variance))
}

#[derive(Debug, Clone)]
pub struct ParamBTarget<'a> {
    binner: VarianceBinner<'a>,
    a: f64,
}

impl<'a> ParamBTarget<'a> {
    pub const ACTIVE: [ParamName; 1] = [ParamName::B];

    pub fn new(binner: VarianceBinner<'a>, a: f64) -> Self {
        Self { binner, a }
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn binner(&self) -> &VarianceBinner<'a> {
        &self.binner
    }

    pub fn into_binner(self) -> VarianceBinner<'a> {
        self.binner
    }

    fn params_for(&self, state: &ParameterState) -> ErrorModelParams {
        ErrorModelParams::new(self.a, state.values()[0])
    }

    fn check_fresh(&self, state: &ParameterState) -> Result<(), TargetError> {
        self.check_state(state)?;
        let binned = self.binner.params();
        let wanted = self.params_for(state);
        // Bitwise, so a NaN state still matches once progressed.
        if binned.a.to_bits() != wanted.a.to_bits() || binned.b.to_bits() != wanted.b.to_bits() {
            return Err(TargetError::StaleBins {
                binned: binned.b,
                requested: wanted.b,
            });
        }
        Ok(())
    }
}

impl ErrorModelTarget for ParamBTarget<'_> {
    fn n_active(&self) -> usize {
        1
    }

    fn num_matches(&self) -> usize {
        self.binner.table().n_obs()
    }

    fn progress(&mut self, state: &ParameterState) -> Result<(), TargetError> {
        self.check_state(state)?;
        let params = self.params_for(state);
        self.binner.update(&params);
        Ok(())
    }

    fn residuals(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError> {
        self.check_fresh(state)?;
        let variances = self.binner.bin_variances();
        let weights = self.binner.weights();
        let total = weights.sum();
        Ok(DVector::from_iterator(
            variances.len(),
            variances
                .iter()
                .zip(weights.iter())
                .map(|(&v, &w)| bin_loss(v) * w / total),
        ))
    }

    fn gradients(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError> {
        self.check_fresh(state)?;
        let binner = &self.binner;
        let params = binner.params();
        let table = binner.table();
        let sigmaprime = binner.sigmaprime();
        let deltas = binner.deltas();

        // dδ/db = (−δ/σ')·dσ'/db
        let ddelta = DVector::from_iterator(
            deltas.len(),
            (0..deltas.len()).map(|i| {
                let dsig = corrected_sigma_db(
                    params,
                    table.intensities()[i],
                    table.inverse_scales()[i],
                    sigmaprime[i],
                );
                -deltas[i] / sigmaprime[i] * dsig
            }),
        );

        let term1 = binner.sum_to_bins(&deltas.component_mul(&ddelta).scale(2.0));
        let term2a = binner.sum_to_bins(deltas);
        let term2b = binner.sum_to_bins(&ddelta);
        let counts = binner.refl_per_bin();
        let variances = binner.bin_variances();
        let weights = binner.weights();

        let weighted: f64 = (0..binner.n_bins())
            .map(|k| {
                let c = counts[k];
                let dvar = term1[k] / c - 2.0 * term2a[k] * term2b[k] / (c * c);
                bin_loss_derivative(variances[k]) * dvar * weights[k]
            })
            .sum();
        Ok(DVector::from_element(1, weighted / weights.sum()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::group_table::IntensityGroupTable;
    use crate::domain::Observation;
    use crate::targets::testing::numeric_gradient;
    use approx::assert_relative_eq;

    fn fixture_table() -> IntensityGroupTable {
        let groups: [(&str, [f64; 3], [f64; 3], [f64; 3]); 4] = [
            ("g1", [10.0, 14.0, 7.0], [4.0, 5.0, 3.0], [1.0, 1.1, 0.9]),
            ("g2", [52.0, 47.0, 61.0], [20.0, 18.0, 25.0], [1.0, 0.95, 1.05]),
            ("g3", [210.0, 190.0, 235.0], [80.0, 75.0, 90.0], [1.0, 1.02, 0.97]),
            ("g4", [980.0, 1105.0, 1020.0], [300.0, 320.0, 310.0], [1.0, 1.1, 0.95]),
        ];
        let obs: Vec<Observation> = groups
            .iter()
            .flat_map(|(label, is, vs, gs)| {
                (0..3).map(move |k| Observation {
                    group: label.to_string(),
                    intensity: is[k],
                    variance: vs[k],
                    inverse_scale: gs[k],
                })
            })
            .collect();
        IntensityGroupTable::from_observations(&obs).unwrap()
    }

    fn b_state(b: f64) -> ParameterState {
        ParameterState::from_slice(&ParamBTarget::ACTIVE, &[b]).unwrap()
    }

    #[test]
    fn loss_is_minimal_at_unit_variance() {
        assert_relative_eq!(bin_loss(1.0), 0.0, epsilon = 1e-15);
        assert_relative_eq!(bin_loss_derivative(1.0), 0.0, epsilon = 1e-15);
        for v in [0.2, 0.7, 0.99, 1.01, 1.5, 4.0] {
            assert!(bin_loss(v) > 0.0, "loss at {v}");
        }
        assert!(bin_loss_derivative(0.9) < 0.0);
        assert!(bin_loss_derivative(1.1) > 0.0);
    }

    #[test]
    fn unit_bin_variance_is_a_stationary_point() {
        let table = fixture_table();
        for b in [0.0, 0.05, 0.2] {
            let mut binner = VarianceBinner::new(&table, 1, 3).unwrap();
            binner.update(&ErrorModelParams::new(1.0, b));
            // With a single bin, v ∝ 1/a² at fixed b: pick a so that v = 1.
            let a = binner.bin_variances()[0].sqrt();

            let mut target = ParamBTarget::new(binner, a);
            let eval = target.evaluate(&b_state(b)).unwrap();
            assert_relative_eq!(target.binner().bin_variances()[0], 1.0, max_relative = 1e-12);
            assert_relative_eq!(eval.functional, 0.0, epsilon = 1e-12);
            assert_relative_eq!(eval.gradient[0], 0.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn unit_variance_in_every_bin_is_stationary_for_unequal_weights() {
        // Seven identical pairs: per bin the pooled deviations have the same
        // variance, and 4/4/6 observations per bin keep every pair whole.
        let obs: Vec<Observation> = (0..7)
            .flat_map(|k| {
                [(52.0, 4.0, 1.0), (47.0, 9.0, 0.9)].map(|(intensity, variance, inverse_scale)| Observation {
                    group: format!("p{k}"),
                    intensity,
                    variance,
                    inverse_scale,
                })
            })
            .collect();
        let table = IntensityGroupTable::from_observations(&obs).unwrap();

        for b in [0.01, 0.05, 0.2] {
            let mut binner = VarianceBinner::new(&table, 3, 2).unwrap();
            assert_eq!(binner.weights().as_slice(), &[4.0, 4.0, 6.0]);
            binner.update(&ErrorModelParams::new(1.0, b));
            let a = binner.bin_variances()[0].sqrt();

            let mut target = ParamBTarget::new(binner.clone(), a);
            let eval = target.evaluate(&b_state(b)).unwrap();
            for &v in target.binner().bin_variances().iter() {
                assert_relative_eq!(v, 1.0, max_relative = 1e-12);
            }
            assert_relative_eq!(eval.functional, 0.0, epsilon = 1e-12);
            assert_relative_eq!(eval.gradient[0], 0.0, epsilon = 1e-10);

            // Away from unit variance the same chain gives a non-zero slope.
            let mut off = ParamBTarget::new(binner, 1.1 * a);
            assert!(off.evaluate(&b_state(b)).unwrap().gradient[0].abs() > 1e-6);
        }
    }

    #[test]
    fn matches_reference_values() {
        let table = fixture_table();
        let binner = VarianceBinner::new(&table, 2, 3).unwrap();
        let mut target = ParamBTarget::new(binner, 1.3);
        let eval = target.evaluate(&b_state(0.05)).unwrap();

        let v = target.binner().bin_variances();
        assert_relative_eq!(v[0], 0.6315, max_relative = 1e-3);
        assert_relative_eq!(v[1], 1.3902, max_relative = 1e-3);
        assert_relative_eq!(eval.functional, 0.30634, max_relative = 1e-3);
        assert_relative_eq!(eval.gradient[0], -18.535, max_relative = 1e-3);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let table = fixture_table();
        for (a, b) in [(1.3, 0.05), (1.0, 0.02), (0.8, 0.1), (1.5, 0.2)] {
            let binner = VarianceBinner::new(&table, 2, 3).unwrap();
            let mut target = ParamBTarget::new(binner, a);
            let state = b_state(b);
            let analytic = target.evaluate(&state).unwrap().gradient;
            let numeric = numeric_gradient(&mut target, &state, 1e-7);
            assert_relative_eq!(analytic[0], numeric[0], epsilon = 1e-9, max_relative = 1e-5);
        }
    }

    #[test]
    fn reading_without_progress_is_an_error() {
        let table = fixture_table();
        let binner = VarianceBinner::new(&table, 2, 3).unwrap();
        let target = ParamBTarget::new(binner, 1.3);
        assert!(matches!(
            target.residuals(&b_state(0.05)),
            Err(TargetError::StaleBins { .. })
        ));
    }

    #[test]
    fn rmsd_is_non_negative() {
        let table = fixture_table();
        let binner = VarianceBinner::new(&table, 2, 3).unwrap();
        let mut target = ParamBTarget::new(binner, 1.1);
        for b in [0.0, 0.03, 0.3] {
            target.progress(&b_state(b)).unwrap();
            assert!(target.rmsds(&b_state(b)).unwrap()[0] >= 0.0);
        }
        assert_eq!(target.num_matches(), 12);
    }

    #[test]
    fn progress_checks_cardinality() {
        let table = fixture_table();
        let binner = VarianceBinner::new(&table, 2, 3).unwrap();
        let mut target = ParamBTarget::new(binner, 1.0);
        let state = ParameterState::from_slice(&[ParamName::A, ParamName::B], &[1.0, 0.1]).unwrap();
        assert_eq!(
            target.progress(&state).unwrap_err(),
            TargetError::Cardinality { expected: 1, found: 2 }
        );
    }
}
