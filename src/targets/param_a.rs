//! Straight-line fit of a normal probability plot.
//!
//! Active parameters are `(intercept, slope)`. When the plotted deviations were
//! computed with `a = 1`, the fitted slope is a quick estimate of `a` that does
//! not depend on binning.

use nalgebra::DVector;

use crate::domain::{ParamName, ParameterState};
use crate::error::TargetError;
use crate::math::NormalProbabilityPlot;
use crate::targets::ErrorModelTarget;

#[derive(Debug, Clone)]
pub struct ParamATarget {
    sorted_x: DVector<f64>,
    sorted_y: DVector<f64>,
}

impl ParamATarget {
    pub const ACTIVE: [ParamName; 2] = [ParamName::Intercept, ParamName::Slope];

    pub fn new(sorted_x: DVector<f64>, sorted_y: DVector<f64>) -> Result<Self, TargetError> {
        if sorted_x.len() != sorted_y.len() {
            return Err(TargetError::LengthMismatch {
                what: "sorted y",
                expected: sorted_x.len(),
                found: sorted_y.len(),
            });
        }
        if sorted_x.is_empty() {
            return Err(TargetError::EmptyTable);
        }
        Ok(Self { sorted_x, sorted_y })
    }

    pub fn from_plot(plot: NormalProbabilityPlot) -> Result<Self, TargetError> {
        Self::new(plot.x, plot.y)
    }

    fn raw_residuals(&self, state: &ParameterState) -> DVector<f64> {
        let intercept = state.values()[0];
        let slope = state.values()[1];
        DVector::from_iterator(
            self.sorted_x.len(),
            self.sorted_x
                .iter()
                .zip(self.sorted_y.iter())
                .map(|(&x, &y)| y - slope * x - intercept),
        )
    }
}

impl ErrorModelTarget for ParamATarget {
    fn n_active(&self) -> usize {
        2
    }

    fn num_matches(&self) -> usize {
        self.sorted_x.len()
    }

    fn residuals(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError> {
        self.check_state(state)?;
        Ok(self.raw_residuals(state).map(|r| r * r))
    }

    fn gradients(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError> {
        self.check_state(state)?;
        let r = self.raw_residuals(state);
        Ok(DVector::from_vec(vec![-2.0 * r.sum(), -2.0 * r.dot(&self.sorted_x)]))
    }
}
