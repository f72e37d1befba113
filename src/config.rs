use serde::{Deserialize, Serialize};

use crate::engine::{Parallelism, ResamplingEngine};
use crate::error::{ResampleError, Result};
use crate::tools::validate_confidence_level;

pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_RESAMPLES: usize = 10_000;
/// Default for the strategies whose trials are single closed-form draws.
pub const DEFAULT_DRAWS: usize = 100_000;

/// Settings shared by every session and stateless procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub confidence_level: f64,
    pub n_resamples: usize,
    pub seed: Option<u64>,
    pub parallelism: Parallelism,
    pub progress: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            n_resamples: DEFAULT_RESAMPLES,
            seed: None,
            parallelism: Parallelism::Available,
            progress: false,
        }
    }
}

impl SessionConfig {
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_resamples(mut self, n: usize) -> Self {
        self.n_resamples = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Checks ranges and turns progress off for parallel execution.
    pub fn validate(mut self) -> Result<Self> {
        validate_confidence_level(self.confidence_level)?;
        if self.n_resamples == 0 {
            return Err(ResampleError::config("n_resamples must be at least 1"));
        }
        if !self.parallelism.is_sequential() {
            self.progress = false;
        }
        Ok(self)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<Self>(json)
            .map_err(|e| ResampleError::config(format!("invalid configuration: {e}")))?
            .validate()
    }

    pub fn engine(&self) -> Result<ResamplingEngine> {
        ResamplingEngine::new(self.n_resamples, self.seed, self.parallelism, self.progress)
    }
}
