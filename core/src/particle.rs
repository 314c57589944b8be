//! Particles, the particle set, and pose estimates drawn from the set.
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::error::{FilterError, Result};
use crate::sampling::Sampler;
use crate::{Pose, wrap_to_pi};

/// A single pose hypothesis carrying an unnormalized importance weight.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Particle {
    /// Index of the particle within its generation (reassigned on every resample)
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Unnormalized likelihood, never required to sum to one across the set
    pub weight: f64,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
}

/// Strategy for collapsing the particle set into a single pose estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum EstimateStrategy {
    /// Weight-averaged position with a weighted circular mean heading
    #[default]
    WeightedMean,
    /// Unweighted average over all particles
    Mean,
    /// The single highest-weight particle
    Best,
}

/// Fixed-size ordered sequence of particles with a parallel weight sequence.
///
/// `weights()[i] == particles()[i].weight` holds after every public call. The set is addressed by index;
/// no reference into it outlives a generation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleSet {
    particles: Vec<Particle>,
    weights: Vec<f64>,
}

impl ParticleSet {
    /// Sample `num_particles` poses independently from per-axis normal distributions around `pose`, each
    /// with weight 1.0.
    pub fn sample(
        num_particles: usize,
        pose: Pose,
        std: [f64; 3],
        sampler: &mut Sampler,
    ) -> Result<Self> {
        if num_particles == 0 {
            return Err(FilterError::Config(
                "number of particles must be positive".to_string(),
            ));
        }
        if !pose.is_finite() {
            return Err(FilterError::Config(format!(
                "initial pose must be finite, got {pose}"
            )));
        }
        let dist_x: Normal<f64> = Sampler::normal(pose.x, std[0])?;
        let dist_y: Normal<f64> = Sampler::normal(pose.y, std[1])?;
        let dist_theta: Normal<f64> = Sampler::normal(pose.theta, std[2])?;
        let particles = (0..num_particles)
            .map(|id| {
                let x = sampler.sample(&dist_x);
                let y = sampler.sample(&dist_y);
                let theta = sampler.sample(&dist_theta);
                Particle::new(id, Pose::new(x, y, theta), 1.0)
            })
            .collect();
        Ok(ParticleSet::from_particles(particles))
    }

    /// Build a set from existing particles; the parallel weight sequence is taken from the particles.
    pub fn from_particles(particles: Vec<Particle>) -> Self {
        let weights = particles.iter().map(|p| p.weight).collect();
        ParticleSet { particles, weights }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn get(&self, index: usize) -> Option<&Particle> {
        self.particles.get(index)
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }

    /// Replace the pose of particle `index`. Out-of-range indices are a configuration error.
    pub fn set_pose(&mut self, index: usize, pose: Pose) -> Result<()> {
        let particle = self.particles.get_mut(index).ok_or_else(|| {
            FilterError::Config(format!("particle index {index} out of range"))
        })?;
        particle.x = pose.x;
        particle.y = pose.y;
        particle.theta = pose.theta;
        Ok(())
    }

    /// Set the weight of particle `index` on both the particle and the parallel weight sequence.
    pub fn set_weight(&mut self, index: usize, weight: f64) -> Result<()> {
        if index >= self.particles.len() {
            return Err(FilterError::Config(format!(
                "particle index {index} out of range"
            )));
        }
        self.particles[index].weight = weight;
        self.weights[index] = weight;
        Ok(())
    }

    /// Overwrite every weight at once. The slice must match the set size.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.particles.len() {
            return Err(FilterError::Config(format!(
                "expected {} weights, got {}",
                self.particles.len(),
                weights.len()
            )));
        }
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    /// Replace every pose at once, in index order. The slice must match the set size.
    pub(crate) fn set_poses(&mut self, poses: &[Pose]) -> Result<()> {
        if poses.len() != self.particles.len() {
            return Err(FilterError::Config(format!(
                "expected {} poses, got {}",
                self.particles.len(),
                poses.len()
            )));
        }
        for (particle, pose) in self.particles.iter_mut().zip(poses.iter()) {
            particle.x = pose.x;
            particle.y = pose.y;
            particle.theta = pose.theta;
        }
        Ok(())
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Weights scaled to sum to one. Falls back to uniform weights when the total is zero or not finite.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let sum = self.total_weight();
        if sum > 0.0 && sum.is_finite() {
            self.weights.iter().map(|w| w / sum).collect()
        } else {
            let uniform = 1.0 / self.len().max(1) as f64;
            vec![uniform; self.len()]
        }
    }

    /// N_eff = 1 / sum(w_i^2) over the normalized weights.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares: f64 = self.normalized_weights().iter().map(|w| w * w).sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }

    /// The particle with the largest weight (first one on ties).
    pub fn best(&self) -> Option<&Particle> {
        self.particles.iter().fold(None, |best, p| match best {
            Some(b) if b.weight >= p.weight => Some(b),
            _ => Some(p),
        })
    }

    pub fn min_weight(&self) -> f64 {
        self.weights.iter().cloned().fold(f64::INFINITY, f64::min)
    }
    pub fn max_weight(&self) -> f64 {
        self.weights.iter().cloned().fold(0.0, f64::max)
    }

    /// Collapse the set into a single pose. Returns `None` for an empty set.
    pub fn estimate(&self, strategy: EstimateStrategy) -> Option<Pose> {
        if self.is_empty() {
            return None;
        }
        match strategy {
            EstimateStrategy::WeightedMean => Some(self.weighted_mean(&self.normalized_weights())),
            EstimateStrategy::Mean => {
                let uniform = vec![1.0 / self.len() as f64; self.len()];
                Some(self.weighted_mean(&uniform))
            }
            EstimateStrategy::Best => self.best().map(Particle::pose),
        }
    }

    fn weighted_mean(&self, weights: &[f64]) -> Pose {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut sin = 0.0;
        let mut cos = 0.0;
        for (particle, &w) in self.particles.iter().zip(weights.iter()) {
            x += w * particle.x;
            y += w * particle.y;
            sin += w * particle.theta.sin();
            cos += w * particle.theta.cos();
        }
        Pose::new(x, y, wrap_to_pi(sin.atan2(cos)))
    }
}
