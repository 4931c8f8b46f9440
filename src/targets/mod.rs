//! Target functions for error-model refinement.
//!
//! A target turns a [`ParameterState`] into a residual vector, whose sum is the
//! functional handed to the optimizer, and an analytic gradient ordered like
//! the active parameters. Three targets exist:
//!
//! - [`RegressionTarget`]: closed-form least squares on per-observation
//!   `(x, y)` pairs, in one of three modes (`a` alone, `b` alone, or jointly).
//! - [`ParamATarget`]: straight-line fit of a normal probability plot.
//! - [`ParamBTarget`]: binned deviation variances driven towards one.
//!
//! Optimizers should call [`ErrorModelTarget::evaluate`], which runs the
//! per-iteration [`progress`](ErrorModelTarget::progress) hook before any
//! residual is read.

use nalgebra::DVector;

use crate::domain::ParameterState;
use crate::error::TargetError;

pub mod param_a;
pub mod param_b;
pub mod regression;

pub use param_a::ParamATarget;
pub use param_b::ParamBTarget;
pub use regression::{RegressionMode, RegressionTarget};

/// Functional value and gradient at one parameter state.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub functional: f64,
    pub gradient: DVector<f64>,
}

pub trait ErrorModelTarget {
    /// Number of active parameters the target expects.
    fn n_active(&self) -> usize;

    /// Number of observations contributing to the residuals (diagnostic only).
    fn num_matches(&self) -> usize;

    /// Residual vector; each entry is already squared.
    fn residuals(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError>;

    /// Gradient of the functional, ordered like `state`.
    fn gradients(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError>;

    /// Per-iteration hook run before residuals are read. No-op by default.
    fn progress(&mut self, _state: &ParameterState) -> Result<(), TargetError> {
        Ok(())
    }

    /// Regularisation term and its gradient. Zero unless overridden.
    fn restraints_functional_gradients(&self, _state: &ParameterState) -> (f64, f64) {
        (0.0, 0.0)
    }

    /// Fail fast when the state does not carry as many values as the target expects.
    fn check_state(&self, state: &ParameterState) -> Result<(), TargetError> {
        if state.len() != self.n_active() {
            return Err(TargetError::Cardinality {
                expected: self.n_active(),
                found: state.len(),
            });
        }
        Ok(())
    }

    fn functional_and_gradient(&self, state: &ParameterState) -> Result<Evaluation, TargetError> {
        Ok(Evaluation {
            functional: self.residuals(state)?.sum(),
            gradient: self.gradients(state)?,
        })
    }

    /// Progress to `state`, then compute functional and gradient.
    fn evaluate(&mut self, state: &ParameterState) -> Result<Evaluation, TargetError> {
        self.progress(state)?;
        self.functional_and_gradient(state)
    }

    /// `sqrt((ΣR + restraint) / n)` with `n` the residual count.
    fn rmsds(&self, state: &ParameterState) -> Result<Vec<f64>, TargetError> {
        let r = self.residuals(state)?;
        let n = r.len() as f64;
        let restraint = self.restraints_functional_gradients(state).0;
        Ok(vec![((r.sum() + restraint) / n).sqrt()])
    }
}
