//! Seeded resampling engine.
//!
//! Runs `n` independent trials, each with its own Xoshiro generator derived
//! from a master seed and the trial index, either sequentially or on a rayon
//! pool. Rows come back in trial order.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ResampleError, Result};

const SEED_STRIDE: u64 = 0x9e3779b97f4a7c15;

/// How trials are spread over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parallelism {
    Sequential,
    /// Dedicated pool of this many workers.
    Threads(NonZeroUsize),
    /// The global rayon pool.
    #[default]
    Available,
}

impl Parallelism {
    /// Maps the usual `n_jobs` convention: 1 is sequential, anything below 1
    /// uses every available core.
    pub fn from_jobs(n_jobs: i64) -> Self {
        match n_jobs {
            1 => Parallelism::Sequential,
            n if n > 1 => NonZeroUsize::new(n as usize)
                .map(Parallelism::Threads)
                .unwrap_or(Parallelism::Available),
            _ => Parallelism::Available,
        }
    }

    fn normalized(self) -> Self {
        match self {
            Parallelism::Threads(n) if n.get() == 1 => Parallelism::Sequential,
            other => other,
        }
    }

    pub fn is_sequential(self) -> bool {
        self.normalized() == Parallelism::Sequential
    }
}

#[derive(Debug, Clone)]
pub struct ResamplingEngine {
    n_resamples: usize,
    master_seed: u64,
    parallelism: Parallelism,
    progress: bool,
    elapsed: Option<Duration>,
}

impl ResamplingEngine {
    pub fn new(
        n_resamples: usize,
        seed: Option<u64>,
        parallelism: Parallelism,
        progress: bool,
    ) -> Result<Self> {
        if n_resamples == 0 {
            return Err(ResampleError::config("n_resamples must be at least 1"));
        }
        let parallelism = parallelism.normalized();
        let progress = if progress && !parallelism.is_sequential() {
            debug!(?parallelism, "progress reporting disabled for parallel execution");
            false
        } else {
            progress
        };
        Ok(Self {
            n_resamples,
            master_seed: seed.unwrap_or_else(rand::random),
            parallelism,
            progress,
            elapsed: None,
        })
    }

    pub fn n_resamples(&self) -> usize {
        self.n_resamples
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Duration of the last `resample` call.
    pub fn elapsed_time(&self) -> Option<Duration> {
        self.elapsed
    }

    #[inline]
    fn trial_rng(&self, i: u64) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(self.master_seed ^ i.wrapping_mul(SEED_STRIDE))
    }

    /// Runs every trial and gathers one row of `K` values per trial.
    pub fn resample<const K: usize, F>(&mut self, trial: F) -> Result<Vec<[f64; K]>>
    where
        F: Fn(&mut Xoshiro256PlusPlus) -> [f64; K] + Sync + Send,
    {
        let start = Instant::now();
        let n = self.n_resamples as u64;
        debug!(n_resamples = n, parallelism = ?self.parallelism, "resampling started");

        let run_one = |i: u64| {
            let mut rng = self.trial_rng(i);
            trial(&mut rng)
        };

        let rows: Vec<[f64; K]> = match self.parallelism {
            Parallelism::Sequential => {
                let tick = (n / 10).max(1);
                (0..n)
                    .map(|i| {
                        let row = run_one(i);
                        if self.progress && (i + 1) % tick == 0 {
                            info!(done = i + 1, total = n, "resampling progress");
                        }
                        row
                    })
                    .collect()
            }
            Parallelism::Available => (0..n).into_par_iter().map(run_one).collect(),
            Parallelism::Threads(workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers.get())
                    .build()?;
                pool.install(|| (0..n).into_par_iter().map(run_one).collect())
            }
        };

        let elapsed = start.elapsed();
        self.elapsed = Some(elapsed);
        debug!(n_resamples = n, ?elapsed, "resampling finished");
        Ok(rows)
    }

    /// Single-column convenience over [`ResamplingEngine::resample`].
    pub fn resample_scalar<F>(&mut self, trial: F) -> Result<Vec<f64>>
    where
        F: Fn(&mut Xoshiro256PlusPlus) -> f64 + Sync + Send,
    {
        Ok(self
            .resample(|rng| [trial(rng)])?
            .into_iter()
            .map(|[v]| v)
            .collect())
    }
}

/// Splits rows into one vector per column.
pub fn columns<const K: usize>(rows: &[[f64; K]]) -> [Vec<f64>; K] {
    std::array::from_fn(|j| rows.iter().map(|row| row[j]).collect())
}
