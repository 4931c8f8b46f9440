//! Static table of the error models the tool can refine.
//!
//! Models are resolved by name once, when the configuration is built. Each
//! entry names the refinement strategy it runs and how to read its parameters
//! from JSON.

use crate::domain::{ErrorModelParams, RefineStrategy};
use crate::error::TargetError;

/// One registered error model.
#[derive(Debug, Clone, Copy)]
pub struct ModelEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub strategy: RefineStrategy,
    pub deserialize: fn(&str) -> Result<ErrorModelParams, TargetError>,
}

pub static MODELS: &[ModelEntry] = &[
    ModelEntry {
        name: "basic",
        description: "a from a normal probability plot, b from binned deviation variances",
        strategy: RefineStrategy::Basic,
        deserialize: params_from_json,
    },
    ModelEntry {
        name: "regression",
        description: "joint regression of group variances on reported variances",
        strategy: RefineStrategy::Regression,
        deserialize: params_from_json,
    },
    ModelEntry {
        name: "alternating",
        description: "regression of a and b refined one at a time",
        strategy: RefineStrategy::Alternating,
        deserialize: params_from_json,
    },
];

/// Look up a model by name (case-insensitive).
pub fn lookup(name: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}

/// Like [`lookup`], but unknown names are an option error listing the valid ones.
pub fn resolve(name: &str) -> Result<&'static ModelEntry, TargetError> {
    lookup(name).ok_or_else(|| TargetError::InvalidOption {
        name: "model",
        reason: format!(
            "unknown model '{name}'; valid models are {}",
            MODELS.iter().map(|m| m.name).collect::<Vec<_>>().join(", ")
        ),
    })
}

fn params_from_json(text: &str) -> Result<ErrorModelParams, TargetError> {
    let params: ErrorModelParams = serde_json::from_str(text).map_err(|e| TargetError::InvalidOption {
        name: "parameters",
        reason: format!("invalid parameter JSON: {e}"),
    })?;
    if !(params.a.is_finite() && params.b.is_finite()) {
        return Err(TargetError::InvalidOption {
            name: "parameters",
            reason: "parameters must be finite".into(),
        });
    }
    Ok(params)
}
