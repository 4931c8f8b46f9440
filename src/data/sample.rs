//! Synthetic experiment generation.
//!
//! Every group has a true intensity `J` drawn log-uniformly. Each member gets
//! an inverse scale `g`, a reported variance `g·J + background` (counting
//! statistics plus a flat background), and a measured value
//! `g·J + N(0, a·sqrt(σ² + (b·g·J)²))`. Refining the resulting table should
//! recover `(a, b)`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorModelParams, Observation};
use crate::error::TargetError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    pub n_groups: usize,
    /// Observations per group.
    pub multiplicity: usize,
    /// Parameters the noise is drawn with.
    pub truth: ErrorModelParams,
    pub intensity_min: f64,
    pub intensity_max: f64,
    /// Inverse scales are uniform in `1 ± scale_spread`.
    pub scale_spread: f64,
    pub background: f64,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            n_groups: 2000,
            multiplicity: 4,
            truth: ErrorModelParams::new(1.2, 0.03),
            intensity_min: 5.0,
            intensity_max: 5000.0,
            scale_spread: 0.2,
            background: 10.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub observations: Vec<Observation>,
    pub stats: SampleStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub n_obs: usize,
    pub n_groups: usize,
    pub intensity_min: f64,
    pub intensity_max: f64,
}

pub fn generate_sample(config: &SampleConfig) -> Result<SampleData, TargetError> {
    validate(config)?;

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let unit = Normal::new(0.0, 1.0).map_err(|e| TargetError::InvalidOption {
        name: "noise",
        reason: e.to_string(),
    })?;

    let ln_min = config.intensity_min.ln();
    let ln_max = config.intensity_max.ln();
    let (a, b) = (config.truth.a, config.truth.b);

    let mut observations = Vec::with_capacity(config.n_groups * config.multiplicity);
    for group in 0..config.n_groups {
        let true_intensity = rng.gen_range(ln_min..=ln_max).exp();
        // Zero-padded so sorted labels follow generation order.
        let label = format!("h{group:06}");
        for _ in 0..config.multiplicity {
            let inverse_scale = if config.scale_spread > 0.0 {
                rng.gen_range(1.0 - config.scale_spread..=1.0 + config.scale_spread)
            } else {
                1.0
            };
            let scaled = inverse_scale * true_intensity;
            let variance = scaled + config.background;
            let sd = a * (variance + (b * scaled).powi(2)).sqrt();
            let intensity = scaled + sd * unit.sample(&mut rng);
            observations.push(Observation {
                group: label.clone(),
                intensity,
                variance,
                inverse_scale,
            });
        }
    }

    let stats = compute_stats(&observations, config.n_groups)
        .ok_or_else(|| TargetError::Degenerate("generated sample has non-finite intensities".into()))?;
    Ok(SampleData { observations, stats })
}

fn validate(config: &SampleConfig) -> Result<(), TargetError> {
    if config.n_groups == 0 {
        return Err(TargetError::InvalidOption {
            name: "n_groups",
            reason: "must be > 0".into(),
        });
    }
    if config.multiplicity < 2 {
        return Err(TargetError::InvalidOption {
            name: "multiplicity",
            reason: "groups need at least 2 observations".into(),
        });
    }
    if !(config.intensity_min.is_finite()
        && config.intensity_max.is_finite()
        && config.intensity_min > 0.0
        && config.intensity_max > config.intensity_min)
    {
        return Err(TargetError::InvalidOption {
            name: "intensity range",
            reason: format!("need 0 < min < max, got {}..{}", config.intensity_min, config.intensity_max),
        });
    }
    if !(config.scale_spread.is_finite() && (0.0..1.0).contains(&config.scale_spread)) {
        return Err(TargetError::InvalidOption {
            name: "scale_spread",
            reason: format!("must be in [0, 1), got {}", config.scale_spread),
        });
    }
    if !(config.background.is_finite() && config.background >= 0.0) {
        return Err(TargetError::InvalidOption {
            name: "background",
            reason: format!("must be finite and >= 0, got {}", config.background),
        });
    }
    if !(config.truth.a.is_finite() && config.truth.b.is_finite() && config.truth.a > 0.0) {
        return Err(TargetError::InvalidOption {
            name: "truth",
            reason: "a must be > 0 and both parameters finite".into(),
        });
    }
    Ok(())
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.n_groups.hash(&mut hasher);
    config.multiplicity.hash(&mut hasher);
    config.truth.a.to_bits().hash(&mut hasher);
    config.truth.b.to_bits().hash(&mut hasher);
    config.intensity_min.to_bits().hash(&mut hasher);
    config.intensity_max.to_bits().hash(&mut hasher);
    config.scale_spread.to_bits().hash(&mut hasher);
    config.background.to_bits().hash(&mut hasher);
    hasher.finish()
}

fn compute_stats(observations: &[Observation], n_groups: usize) -> Option<SampleStats> {
    let mut intensity_min = f64::INFINITY;
    let mut intensity_max = f64::NEG_INFINITY;
    for o in observations {
        intensity_min = intensity_min.min(o.intensity);
        intensity_max = intensity_max.max(o.intensity);
    }
    if !intensity_min.is_finite() || !intensity_max.is_finite() {
        return None;
    }
    Some(SampleStats {
        n_obs: observations.len(),
        n_groups,
        intensity_min,
        intensity_max,
    })
}
