//! Resampling strategies
//!
//! Every strategy draws `N` indices with replacement from the current generation with probability
//! proportional to weight, then rebuilds the particle set from those indices. Drawn particles keep their
//! pose and weight; identifiers are reassigned `0..N` in draw order.
//!
//! [`multinomial_resample`] is the default and matches a plain weighted categorical draw.
//! [`systematic_resample`] and [`residual_resample`] are lower-variance alternatives.
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::particle::{Particle, ParticleSet};
use crate::sampling::Sampler;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    #[default]
    Multinomial,
    Systematic,
    Residual,
}

impl ResamplingStrategy {
    /// Draw a new generation from `set`. The input set is left untouched.
    pub fn resample(&self, set: &ParticleSet, sampler: &mut Sampler) -> Result<ParticleSet> {
        let indices = match self {
            ResamplingStrategy::Multinomial => multinomial_resample(set.weights(), sampler)?,
            ResamplingStrategy::Systematic => systematic_resample(set.weights(), sampler)?,
            ResamplingStrategy::Residual => residual_resample(set.weights(), sampler)?,
        };
        Ok(rebuild(set, &indices))
    }
}

fn rebuild(set: &ParticleSet, indices: &[usize]) -> ParticleSet {
    let particles = indices
        .iter()
        .enumerate()
        .map(|(id, &index)| Particle {
            id,
            ..set.particles()[index]
        })
        .collect();
    ParticleSet::from_particles(particles)
}

/// Normalized weights after checking they define a distribution.
fn normalize(weights: &[f64]) -> Result<Vec<f64>> {
    // Validates: empty, negative, non-finite, all zero, overflowing sum.
    Sampler::discrete(weights)?;
    let sum: f64 = weights.iter().sum();
    Ok(weights.iter().map(|w| w / sum).collect())
}

/// `N` independent draws from the discrete distribution defined by `weights`.
pub fn multinomial_resample(weights: &[f64], sampler: &mut Sampler) -> Result<Vec<usize>> {
    let distribution = Sampler::discrete(weights)?;
    Ok((0..weights.len())
        .map(|_| sampler.sample(&distribution))
        .collect())
}

/// One uniform offset in `[0, 1/N)` followed by `N` evenly spaced pointers into the cumulative weights.
pub fn systematic_resample(weights: &[f64], sampler: &mut Sampler) -> Result<Vec<usize>> {
    let normalized = normalize(weights)?;
    let n = normalized.len();
    let step = 1.0 / n as f64;
    let start = sampler.uniform() * step;
    Ok(walk_cumulative(&normalized, start, step, n))
}

/// Deterministic `floor(N w_i)` copies of each particle, with the remainder drawn systematically from the
/// fractional residuals.
pub fn residual_resample(weights: &[f64], sampler: &mut Sampler) -> Result<Vec<usize>> {
    let normalized = normalize(weights)?;
    let n = normalized.len();
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; n];
    for (i, &w) in normalized.iter().enumerate() {
        let copies = (w * n as f64).floor() as usize;
        residual[i] = w * n as f64 - copies as f64;
        indices.extend(std::iter::repeat_n(i, copies));
    }
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let sum_residual: f64 = residual.iter().sum();
        if sum_residual > 0.0 {
            let step = sum_residual / remaining as f64;
            let start = sampler.uniform() * step;
            indices.extend(walk_cumulative(&residual, start, step, remaining));
        } else {
            // Rounding left slots without residual mass; fill from the heaviest particle.
            let heaviest = argmax(&normalized);
            indices.extend(std::iter::repeat_n(heaviest, remaining));
        }
    }
    Ok(indices)
}

fn walk_cumulative(weights: &[f64], start: f64, step: f64, count: usize) -> Vec<usize> {
    let last = weights.len() - 1;
    let mut indices = Vec::with_capacity(count);
    let mut i = 0;
    let mut cumsum = weights[0];
    let mut position = start;
    for _ in 0..count {
        while position > cumsum && i < last {
            i += 1;
            cumsum += weights[i];
        }
        indices.push(i);
        position += step;
    }
    indices
}

fn argmax(weights: &[f64]) -> usize {
    weights
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bw), (i, &w)| {
            if w > bw { (i, w) } else { (bi, bw) }
        })
        .0
}
