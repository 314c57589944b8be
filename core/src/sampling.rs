//! Random sampling primitive shared by initialization, prediction and resampling.
//!
//! The filter owns exactly one [`Sampler`] for its whole lifetime. It is constructed once, optionally from a
//! fixed seed for reproducible runs, and is never re-created between calls.

use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{FilterError, Result};

/// Process-scoped random stream with normal and discrete draws.
#[derive(Clone, Debug)]
pub struct Sampler {
    rng: StdRng,
    seed: u64,
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::new(None)
    }
}

impl Sampler {
    /// Create a sampler from an optional seed. Without a seed one is drawn from the thread-local
    /// entropy source and recorded so the run can be replayed.
    pub fn new(seed: Option<u64>) -> Self {
        Self::from_seed(seed.unwrap_or_else(rand::random))
    }

    pub fn from_seed(seed: u64) -> Self {
        Sampler {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed this stream was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Build a normal distribution, rejecting negative or non-finite standard deviations.
    ///
    /// A standard deviation of exactly zero is valid and always yields the mean.
    pub fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>> {
        if !mean.is_finite() {
            return Err(FilterError::Config(format!(
                "normal mean must be finite, got {mean}"
            )));
        }
        Normal::new(mean, std_dev).map_err(|e| {
            FilterError::Config(format!("invalid standard deviation {std_dev}: {e}"))
        })
    }

    /// Build a discrete (weighted categorical) distribution over indices `0..weights.len()`.
    ///
    /// Weights need not be normalized. Fails with [`FilterError::DegenerateWeights`] when the weights are all
    /// zero, or any weight is negative or non-finite.
    pub fn discrete(weights: &[f64]) -> Result<WeightedIndex<f64>> {
        if weights.is_empty() {
            return Err(FilterError::DegenerateWeights(
                "weight vector is empty".to_string(),
            ));
        }
        if let Some((i, w)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(FilterError::DegenerateWeights(format!(
                "weight {i} is {w}"
            )));
        }
        if weights.iter().all(|&w| w == 0.0) {
            return Err(FilterError::DegenerateWeights(
                "all weights are zero".to_string(),
            ));
        }
        WeightedIndex::new(weights).map_err(|e| FilterError::DegenerateWeights(e.to_string()))
    }

    /// Draw one value from any distribution using this stream.
    pub fn sample<T, D: Distribution<T>>(&mut self, distribution: &D) -> T {
        distribution.sample(&mut self.rng)
    }

    /// Draw a uniform value in [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}
