use crate::domain::ParamName;

/// Errors raised by the target functions and their collaborators.
///
/// Contract violations (wrong active-parameter cardinality, mismatched data
/// lengths) and structural degeneracy (empty tables, singleton groups) fail
/// fast. Numeric degeneracy inside a target evaluation is propagated as
/// NaN/inf and only turned into [`TargetError::NonFinite`] by the refiner.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TargetError {
    #[error("expected {expected} active parameter(s), found {found}")]
    Cardinality { expected: usize, found: usize },

    #[error("active parameters {found:?} do not select a mode for this target")]
    UnsupportedActiveSet { found: Vec<ParamName> },

    #[error("{what} has {found} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("no observations to work with")]
    EmptyTable,

    #[error("invalid observation at index {index}: {reason}")]
    InvalidObservation { index: usize, reason: &'static str },

    #[error("group '{group}' has a single observation, its variance is undefined")]
    SingletonGroup { group: String },

    #[error("{available} observations cannot fill a bin of at least {min_per_bin}")]
    TooFewForBins { available: usize, min_per_bin: usize },

    #[error("non-finite {what} ({value}) at iteration {iteration}")]
    NonFinite {
        what: &'static str,
        value: f64,
        iteration: usize,
    },

    #[error("bin statistics are for b = {binned}, state asks for b = {requested}; progress was not called")]
    StaleBins { binned: f64, requested: f64 },

    #[error("degenerate result: {0}")]
    Degenerate(String),

    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<TargetError> for AppError {
    fn from(err: TargetError) -> Self {
        let exit_code = match err {
            TargetError::InvalidOption { .. } => 2,
            _ => 4,
        };
        Self::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
