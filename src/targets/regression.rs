//! Weighted least squares on precomputed `(x, y)` pairs.
//!
//! Per observation `x = σ²/I²` and `y = s²_group/I²`. Under the error model
//! `y ≈ a²·x + a²·b²`, so the same pairs serve three fits, chosen once at
//! construction by [`RegressionMode`].

use nalgebra::DVector;

use crate::data::group_table::{IntensityGroupTable, regression_x_y};
use crate::domain::{ErrorModelParams, ParamName, ParameterState};
use crate::error::TargetError;
use crate::targets::ErrorModelTarget;

/// Which regression formula the target evaluates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegressionMode {
    /// Single active value `p = a²`, with `b` held fixed.
    FitA { b: f64 },
    /// Single active value `p = b²`, with `a` held fixed.
    FitB { a: f64 },
    /// Active `(p₀, p₁) = (a², a²·b²)`.
    FitJoint,
}

impl RegressionMode {
    /// Select the mode from the active parameter names.
    ///
    /// The inactive parameter is taken from `fixed`.
    pub fn from_active(active: &[ParamName], fixed: &ErrorModelParams) -> Result<Self, TargetError> {
        match active {
            [ParamName::A] => Ok(Self::FitA { b: fixed.b }),
            [ParamName::B] => Ok(Self::FitB { a: fixed.a }),
            [ParamName::A, ParamName::B] => Ok(Self::FitJoint),
            other => Err(TargetError::UnsupportedActiveSet {
                found: other.to_vec(),
            }),
        }
    }

    pub fn active_names(&self) -> Vec<ParamName> {
        match self {
            Self::FitA { .. } => vec![ParamName::A],
            Self::FitB { .. } => vec![ParamName::B],
            Self::FitJoint => vec![ParamName::A, ParamName::B],
        }
    }

    fn n_active(&self) -> usize {
        match self {
            Self::FitJoint => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegressionTarget {
    x: DVector<f64>,
    y: DVector<f64>,
    mode: RegressionMode,
}

impl RegressionTarget {
    pub fn new(table: &IntensityGroupTable, mode: RegressionMode) -> Result<Self, TargetError> {
        let (x, y) = regression_x_y(table)?;
        Self::from_xy(x, y, mode)
    }

    pub fn from_xy(x: DVector<f64>, y: DVector<f64>, mode: RegressionMode) -> Result<Self, TargetError> {
        if x.len() != y.len() {
            return Err(TargetError::LengthMismatch {
                what: "regression y",
                expected: x.len(),
                found: y.len(),
            });
        }
        if x.is_empty() {
            return Err(TargetError::EmptyTable);
        }
        Ok(Self { x, y, mode })
    }

    pub fn mode(&self) -> RegressionMode {
        self.mode
    }

    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    /// Unsquared residuals `y − model(x)`.
    fn raw_residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        match self.mode {
            RegressionMode::FitA { b } => {
                let bsq = b * b;
                DVector::from_iterator(
                    self.x.len(),
                    self.x.iter().zip(self.y.iter()).map(|(&x, &y)| y - p[0] * (x + bsq)),
                )
            }
            RegressionMode::FitB { a } => {
                let asq = a * a;
                DVector::from_iterator(
                    self.x.len(),
                    self.x
                        .iter()
                        .zip(self.y.iter())
                        .map(|(&x, &y)| y - asq * x - asq * p[0]),
                )
            }
            RegressionMode::FitJoint => DVector::from_iterator(
                self.x.len(),
                self.x.iter().zip(self.y.iter()).map(|(&x, &y)| y - p[0] * x - p[1]),
            ),
        }
    }
}

impl ErrorModelTarget for RegressionTarget {
    fn n_active(&self) -> usize {
        self.mode.n_active()
    }

    fn num_matches(&self) -> usize {
        self.x.len()
    }

    fn residuals(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError> {
        self.check_state(state)?;
        Ok(self.raw_residuals(state.values()).map(|r| r * r))
    }

    fn gradients(&self, state: &ParameterState) -> Result<DVector<f64>, TargetError> {
        self.check_state(state)?;
        let r = self.raw_residuals(state.values());
        let grad = match self.mode {
            RegressionMode::FitA { b } => {
                let bsq = b * b;
                let s: f64 = r.iter().zip(self.x.iter()).map(|(&r, &x)| r * (x + bsq)).sum();
                DVector::from_element(1, -2.0 * s)
            }
            RegressionMode::FitB { a } => DVector::from_element(1, -2.0 * r.sum() * a * a),
            RegressionMode::FitJoint => DVector::from_vec(vec![-2.0 * r.dot(&self.x), -2.0 * r.sum()]),
        };
        Ok(grad)
    }
}
