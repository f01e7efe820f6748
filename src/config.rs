//! Training configuration.
//!
//! Values can come from a TOML file and be overridden on the command line.
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! n_epochs = 10
//! sampler = "sqa"
//! batch_size = 500
//!
//! [anneal]
//! steps = 200
//! trotter = 16
//! ```

use crate::core::{RbmError, RbmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which negative-phase sampler drives training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplerKind {
    /// k-step contrastive divergence over single examples.
    #[default]
    #[serde(rename = "cd")]
    ContrastiveDivergence,
    /// Simulated quantum annealing over mini-batch means.
    #[serde(rename = "sqa")]
    Annealing,
}

impl SamplerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SamplerKind::ContrastiveDivergence => "cd",
            SamplerKind::Annealing => "sqa",
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplerKind {
    type Err = RbmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cd" => Ok(SamplerKind::ContrastiveDivergence),
            "sqa" => Ok(SamplerKind::Annealing),
            other => Err(RbmError::UnknownSampler(other.to_string())),
        }
    }
}

/// Schedule for the built-in simulated quantum annealer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealConfig {
    /// Monte Carlo sweeps per solver call.
    pub steps: usize,
    /// Number of Trotter slices (replicas) in the path-integral chain.
    pub trotter: usize,
    /// Transverse field at the first sweep.
    pub gamma_start: f32,
    /// Transverse field at the last sweep.
    pub gamma_end: f32,
    /// Bath temperature shared by all slices.
    pub temperature: f32,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            trotter: 8,
            gamma_start: 3.0,
            gamma_end: 0.01,
            temperature: 0.05,
        }
    }
}

/// Training configuration supplied per `train` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Number of passes over the dataset.
    pub n_epochs: usize,
    /// Gibbs steps per example (contrastive divergence only).
    pub n_cd: usize,
    pub sampler: SamplerKind,
    /// Mini-batch size (annealing only). Trailing partial batches are dropped.
    pub batch_size: usize,
    /// Learning rate, fixed when the model is constructed.
    pub alpha: f32,
    /// Seed for model and solver RNGs. `None` draws from system entropy.
    pub seed: Option<u64>,
    pub anneal: AnnealConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_epochs: 2,
            n_cd: 1,
            sampler: SamplerKind::ContrastiveDivergence,
            batch_size: 10_000,
            alpha: 0.01,
            seed: None,
            anneal: AnnealConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    /// IO and TOML errors are propagated; the result is also [validated](Self::validate).
    pub fn from_toml_file(path: &Path) -> RbmResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> RbmResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot train.
    ///
    /// `n_cd == 0` is allowed: the chain is empty and every update is zero.
    pub fn validate(&self) -> RbmResult<()> {
        if self.n_epochs == 0 {
            return Err(RbmError::InvalidConfig("n_epochs must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(RbmError::InvalidConfig("batch_size must be > 0".to_string()));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(RbmError::InvalidConfig(format!(
                "alpha must be positive, got {}",
                self.alpha
            )));
        }
        if self.sampler == SamplerKind::Annealing {
            let a = &self.anneal;
            if a.trotter == 0 {
                return Err(RbmError::InvalidConfig("anneal.trotter must be > 0".to_string()));
            }
            if !(a.temperature > 0.0) {
                return Err(RbmError::InvalidConfig(
                    "anneal.temperature must be > 0".to_string(),
                ));
            }
            if !(a.gamma_end > 0.0 && a.gamma_start >= a.gamma_end) {
                tracing::warn!(
                    gamma_start = a.gamma_start,
                    gamma_end = a.gamma_end,
                    "Transverse field should decay from gamma_start to a positive gamma_end"
                );
            }
        }
        Ok(())
    }
}
