//! Sequential importance resampling particle filter
//!
//! [`ParticleFilter`] owns the particle set and the single random stream used by every stochastic step.
//! A filter is created from a [`FilterConfig`], initialized once with [`ParticleFilter::init`], and then
//! advanced per time step with [`ParticleFilter::predict`], [`ParticleFilter::update_weights`] and
//! [`ParticleFilter::resample`], in that order. Every step either completes for all particles or leaves
//! the set exactly as it was.
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::error::{FilterError, Result, ensure_finite, ensure_non_negative};
use crate::measurements::{Association, AssociationPolicy, LandmarkSensor};
use crate::motion::{DEFAULT_YAW_RATE_EPSILON, MotionModel, ProcessNoise};
use crate::particle::{EstimateStrategy, Particle, ParticleSet};
use crate::resample::ResamplingStrategy;
use crate::sampling::Sampler;
use crate::{Control, Landmark, Observation, Pose};

/// Number of particles used unless configured otherwise.
pub const DEFAULT_NUM_PARTICLES: usize = 75;

/// Particle filter configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub num_particles: usize,
    /// Seed for the random stream; `None` seeds from entropy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub association: AssociationPolicy,
    pub resampling: ResamplingStrategy,
    pub estimate: EstimateStrategy,
    /// Yaw rates at or below this magnitude use straight-line motion
    pub yaw_rate_epsilon: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            num_particles: DEFAULT_NUM_PARTICLES,
            seed: None,
            association: AssociationPolicy::Permissive,
            resampling: ResamplingStrategy::Multinomial,
            estimate: EstimateStrategy::WeightedMean,
            yaw_rate_epsilon: DEFAULT_YAW_RATE_EPSILON,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(FilterError::Config(
                "number of particles must be positive".to_string(),
            ));
        }
        ensure_non_negative("yaw rate epsilon", self.yaw_rate_epsilon)
    }
}

/// SIR particle filter over planar poses.
pub struct ParticleFilter {
    config: FilterConfig,
    motion: MotionModel,
    sampler: Sampler,
    particles: Option<ParticleSet>,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.config.num_particles)
            .field("seed", &self.sampler.seed());
        match &self.particles {
            Some(set) => {
                let mean = set.estimate(self.config.estimate).unwrap_or_default();
                s.field("effective_particles", &set.effective_sample_size())
                    .field(
                        "weight_range",
                        &format_args!("[{:.4e}, {:.4e}]", set.min_weight(), set.max_weight()),
                    )
                    .field(
                        "estimate",
                        &format_args!("({:.3}, {:.3}, {:.3} rad)", mean.x, mean.y, mean.theta),
                    );
            }
            None => {
                s.field("initialized", &false);
            }
        }
        s.finish()
    }
}

impl Default for ParticleFilter {
    fn default() -> Self {
        ParticleFilter {
            config: FilterConfig::default(),
            motion: MotionModel::default(),
            sampler: Sampler::default(),
            particles: None,
        }
    }
}

impl ParticleFilter {
    /// Create an uninitialized filter. The random stream is created here and lives as long as the filter.
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        let motion = MotionModel::new(config.yaw_rate_epsilon)?;
        let sampler = Sampler::new(config.seed);
        Ok(ParticleFilter {
            config,
            motion,
            sampler,
            particles: None,
        })
    }

    /// Initialize the particle set around a first pose estimate.
    ///
    /// Each of the configured `num_particles` particles is drawn independently from
    /// Normal(x, std\[0\]), Normal(y, std\[1\]), Normal(theta, std\[2\]) with weight 1.0. Calling `init` again
    /// discards the current set and starts over.
    ///
    /// # Arguments
    ///
    /// * `x` - Initial x position \[m\]
    /// * `y` - Initial y position \[m\]
    /// * `theta` - Initial heading \[rad\]
    /// * `std` - \[std x \[m\], std y \[m\], std theta \[rad\]\]
    pub fn init(&mut self, x: f64, y: f64, theta: f64, std: [f64; 3]) -> Result<()> {
        ensure_non_negative("init std x", std[0])?;
        ensure_non_negative("init std y", std[1])?;
        ensure_non_negative("init std theta", std[2])?;
        let set = ParticleSet::sample(
            self.config.num_particles,
            Pose::new(x, y, theta),
            std,
            &mut self.sampler,
        )?;
        info!(
            "Initialized {} particles around ({:.3}, {:.3}, {:.3}) with seed {}",
            set.len(),
            x,
            y,
            theta,
            self.sampler.seed()
        );
        self.particles = Some(set);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.particles.is_some()
    }

    /// Propagate every particle one time step through the motion model and reset its weight to 1.0.
    ///
    /// # Arguments
    ///
    /// * `delta_t` - Time between steps \[s\], must be non-negative
    /// * `std_pos` - Process noise \[std x \[m\], std y \[m\], std theta \[rad\]\]
    /// * `velocity` - Forward velocity over the step \[m/s\]
    /// * `yaw_rate` - Yaw rate over the step \[rad/s\]
    pub fn predict(
        &mut self,
        delta_t: f64,
        std_pos: [f64; 3],
        velocity: f64,
        yaw_rate: f64,
    ) -> Result<()> {
        let set = self.particles.as_mut().ok_or(FilterError::NotInitialized)?;
        let control = Control::new(velocity, yaw_rate);
        MotionModel::validate(delta_t, &control)?;
        let noise = ProcessNoise::new(std_pos)?;
        let poses: Vec<Pose> = set
            .iter()
            .map(|p| {
                self.motion
                    .sample(&p.pose(), &control, delta_t, &noise, &mut self.sampler)
            })
            .collect();
        set.set_poses(&poses)?;
        set.set_weights(&vec![1.0; poses.len()])?;
        debug!(
            "Predicted {} particles over {:.3}s (v = {:.3}, yaw rate = {:.4})",
            poses.len(),
            delta_t,
            velocity,
            yaw_rate
        );
        Ok(())
    }

    /// Weight every particle by the likelihood of `observations` given its pose.
    ///
    /// For each particle the map is culled to `sensor_range`, the vehicle-frame observations are moved into
    /// the map frame, associated to their nearest landmark, and scored with a bivariate Gaussian. Scores are
    /// summed in log space and converted back with [`weights_from_log`], so weights stay finite and keep
    /// their ratios however many observations there are. The new weight is written to both the particle and
    /// the weight sequence. Particles are scored in parallel;
    /// no randomness is consumed, so repeated calls with the same inputs give identical weights.
    ///
    /// # Arguments
    ///
    /// * `sensor_range` - Sensor range \[m\]
    /// * `std_landmark` - Observation noise \[std x \[m\], std y \[m\]\]
    /// * `observations` - Landmark observations in the vehicle frame
    /// * `map` - Known map landmarks
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[Observation],
        map: &[Landmark],
    ) -> Result<()> {
        let set = self.particles.as_mut().ok_or(FilterError::NotInitialized)?;
        let sensor = LandmarkSensor::new(sensor_range, std_landmark, self.config.association)?;
        for obs in observations {
            ensure_finite("observation x", obs.x)?;
            ensure_finite("observation y", obs.y)?;
        }
        let log_weights = set
            .particles()
            .par_iter()
            .enumerate()
            .map(|(i, p)| {
                sensor
                    .log_weight(&p.pose(), observations, map)
                    .map_err(|e| e.at_particle(i))
            })
            .collect::<Result<Vec<f64>>>()?;
        let weights = weights_from_log(&log_weights);
        set.set_weights(&weights)?;
        if weights.iter().all(|&w| w == 0.0) {
            warn!(
                "All {} particle weights are zero after scoring {} observations",
                weights.len(),
                observations.len()
            );
        }
        debug!(
            "Updated weights from {} observations, effective sample size {:.2}",
            observations.len(),
            set.effective_sample_size()
        );
        Ok(())
    }

    /// Replace the particle set with a new generation drawn in proportion to weight.
    ///
    /// Fails with [`FilterError::DegenerateWeights`] when the weights are all zero; the set is left
    /// untouched so the caller can apply its own fallback.
    pub fn resample(&mut self) -> Result<()> {
        let set = self.particles.as_ref().ok_or(FilterError::NotInitialized)?;
        let next = self.config.resampling.resample(set, &mut self.sampler)?;
        debug!("Resampled {} particles ({:?})", next.len(), self.config.resampling);
        self.particles = Some(next);
        Ok(())
    }

    /// The current particle set.
    pub fn particles(&self) -> Result<&ParticleSet> {
        self.particles.as_ref().ok_or(FilterError::NotInitialized)
    }

    /// Mutable, index-addressed access to the particle set.
    pub fn particles_mut(&mut self) -> Result<&mut ParticleSet> {
        self.particles.as_mut().ok_or(FilterError::NotInitialized)
    }

    /// Current pose estimate under the configured [`EstimateStrategy`].
    pub fn estimate(&self) -> Result<Pose> {
        self.particles()?
            .estimate(self.config.estimate)
            .ok_or(FilterError::NotInitialized)
    }

    /// The highest-weight particle.
    pub fn best_particle(&self) -> Result<Particle> {
        self.particles()?
            .best()
            .copied()
            .ok_or(FilterError::NotInitialized)
    }

    pub fn effective_sample_size(&self) -> Result<f64> {
        Ok(self.particles()?.effective_sample_size())
    }

    /// Association of `observations` for the particle at `index`, for inspecting a single hypothesis.
    pub fn associations(
        &self,
        index: usize,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[Observation],
        map: &[Landmark],
    ) -> Result<Vec<Association>> {
        let particle = self.particles()?.get(index).ok_or_else(|| {
            FilterError::Config(format!("particle index {index} out of range"))
        })?;
        let sensor = LandmarkSensor::new(sensor_range, std_landmark, self.config.association)?;
        let (_, associations) = sensor
            .associations(&particle.pose(), observations, map)
            .map_err(|e| e.at_particle(index))?;
        Ok(associations)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Seed of the filter's random stream.
    pub fn seed(&self) -> u64 {
        self.sampler.seed()
    }
}

/// Linear weights from per-particle log weights.
///
/// When the largest log weight exponentiates to a normal number and the sum cannot overflow, the weights
/// are the plain densities. Otherwise every log weight is shifted by the largest one first, so the best
/// particle gets weight 1.0. Negative infinity maps to exactly 0.0 either way.
pub fn weights_from_log(log_weights: &[f64]) -> Vec<f64> {
    let max = log_weights
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return vec![0.0; log_weights.len()];
    }
    let ceiling = (f64::MAX / log_weights.len() as f64).ln();
    let floor = f64::MIN_POSITIVE.ln();
    let shift = if max > ceiling || max < floor { max } else { 0.0 };
    log_weights.iter().map(|l| (l - shift).exp()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const STD: [f64; 3] = [0.3, 0.3, 0.01];
    const ZERO: [f64; 3] = [0.0, 0.0, 0.0];

    fn seeded(num_particles: usize) -> ParticleFilter {
        ParticleFilter::new(FilterConfig {
            num_particles,
            seed: Some(42),
            ..FilterConfig::default()
        })
        .unwrap()
    }

    fn map() -> Vec<Landmark> {
        vec![
            Landmark::new(1, 5.0, 3.0),
            Landmark::new(2, 2.0, 1.0),
            Landmark::new(3, 6.0, 1.0),
            Landmark::new(4, 7.0, 4.0),
            Landmark::new(5, 4.0, 7.0),
        ]
    }

    #[test]
    fn test_default_particle_count() {
        let mut pf = ParticleFilter::default();
        assert_eq!(pf.config().num_particles, 75);
        pf.init(1.0, 2.0, 0.5, STD).unwrap();
        assert_eq!(pf.particles().unwrap().len(), 75);
        assert!(pf.particles().unwrap().iter().all(|p| p.weight == 1.0));
    }

    #[test]
    fn test_not_initialized() {
        let mut pf = seeded(10);
        assert!(!pf.is_initialized());
        assert!(matches!(
            pf.predict(0.1, STD, 1.0, 0.0),
            Err(FilterError::NotInitialized)
        ));
        assert!(matches!(
            pf.update_weights(50.0, [0.3, 0.3], &[], &map()),
            Err(FilterError::NotInitialized)
        ));
        assert!(matches!(pf.resample(), Err(FilterError::NotInitialized)));
        assert!(matches!(pf.estimate(), Err(FilterError::NotInitialized)));
        assert!(matches!(pf.particles(), Err(FilterError::NotInitialized)));
    }

    #[test]
    fn test_config_errors() {
        assert!(matches!(
            ParticleFilter::new(FilterConfig {
                num_particles: 0,
                ..FilterConfig::default()
            }),
            Err(FilterError::Config(_))
        ));
        let mut pf = seeded(10);
        assert!(matches!(
            pf.init(0.0, 0.0, 0.0, [0.3, -0.3, 0.0]),
            Err(FilterError::Config(_))
        ));
        assert!(!pf.is_initialized());
        pf.init(0.0, 0.0, 0.0, STD).unwrap();
        assert!(matches!(
            pf.predict(-1.0, STD, 1.0, 0.0),
            Err(FilterError::Config(_))
        ));
        assert!(matches!(
            pf.predict(0.1, [0.1, 0.1, -0.1], 1.0, 0.0),
            Err(FilterError::Config(_))
        ));
    }

    #[test]
    fn test_predict_straight_exact() {
        let mut pf = seeded(5);
        pf.init(0.0, 0.0, 0.0, ZERO).unwrap();
        pf.predict(1.0, ZERO, 2.0, 0.0).unwrap();
        for p in pf.particles().unwrap().iter() {
            assert_eq!(p.x, 2.0);
            assert_eq!(p.y, 0.0);
            assert_eq!(p.theta, 0.0);
            assert_eq!(p.weight, 1.0);
        }
    }

    #[test]
    fn test_predict_curved() {
        let mut pf = seeded(5);
        pf.init(0.0, 0.0, 0.0, ZERO).unwrap();
        pf.predict(1.0, ZERO, 1.0, 0.1).unwrap();
        let expected_x = 10.0 * 0.1_f64.sin();
        let expected_y = 10.0 * (1.0 - 0.1_f64.cos());
        for p in pf.particles().unwrap().iter() {
            assert_approx_eq!(p.x, expected_x, 1e-9);
            assert_approx_eq!(p.y, expected_y, 1e-9);
            assert_approx_eq!(p.theta, 0.1, 1e-9);
        }
    }

    #[test]
    fn test_predict_resets_weights() {
        let mut pf = seeded(4);
        pf.init(0.0, 0.0, 0.0, STD).unwrap();
        pf.particles_mut()
            .unwrap()
            .set_weights(&[0.1, 0.2, 0.3, 0.4])
            .unwrap();
        pf.predict(0.1, STD, 1.0, 0.2).unwrap();
        let set = pf.particles().unwrap();
        assert!(set.weights().iter().all(|&w| w == 1.0));
        assert!(set.iter().all(|p| p.weight == 1.0));
    }

    #[test]
    fn test_update_weights_aligned() {
        let mut pf = seeded(3);
        pf.init(0.0, 0.0, 0.0, ZERO).unwrap();
        let map = vec![Landmark::new(1, 5.0, 0.0)];
        pf.update_weights(50.0, [0.3, 0.3], &[Observation::new(0, 5.0, 0.0)], &map)
            .unwrap();
        let expected = 1.0 / (2.0 * std::f64::consts::PI * 0.09);
        let set = pf.particles().unwrap();
        for (p, w) in set.iter().zip(set.weights()) {
            assert_approx_eq!(p.weight, expected, 1e-9);
            assert_eq!(p.weight, *w);
        }
    }

    #[test]
    fn test_update_weights_idempotent() {
        let mut pf = seeded(50);
        pf.init(4.0, 5.0, -1.5, [0.5, 0.5, 0.05]).unwrap();
        let obs = vec![Observation::new(0, 2.0, 2.0), Observation::new(0, 3.0, -2.0)];
        pf.update_weights(50.0, [0.3, 0.3], &obs, &map()).unwrap();
        let first = pf.particles().unwrap().weights().to_vec();
        pf.update_weights(50.0, [0.3, 0.3], &obs, &map()).unwrap();
        assert_eq!(first, pf.particles().unwrap().weights());
    }

    #[test]
    fn test_strict_update_is_all_or_nothing() {
        let mut pf = ParticleFilter::new(FilterConfig {
            num_particles: 10,
            seed: Some(1),
            association: AssociationPolicy::Strict,
            ..FilterConfig::default()
        })
        .unwrap();
        pf.init(100.0, 100.0, 0.0, STD).unwrap();
        pf.particles_mut().unwrap().set_weights(&[2.0; 10]).unwrap();
        let result = pf.update_weights(1.0, [0.3, 0.3], &[Observation::new(0, 1.0, 0.0)], &map());
        assert!(matches!(
            result,
            Err(FilterError::EmptyCandidateSet {
                particle: Some(_),
                observations: 1
            })
        ));
        assert!(pf.particles().unwrap().weights().iter().all(|&w| w == 2.0));
    }

    #[test]
    fn test_many_exact_observations_keep_finite_weights() {
        let mut pf = seeded(3);
        pf.init(0.0, 0.0, 0.0, ZERO).unwrap();
        let map: Vec<Landmark> = (0..200)
            .map(|i| Landmark::new(i, 1.0 + 0.1 * i as f64, 0.0))
            .collect();
        let obs: Vec<Observation> = map
            .iter()
            .map(|l| Observation::new(l.id, l.x, l.y))
            .collect();
        pf.update_weights(100.0, [0.05, 0.05], &obs, &map).unwrap();
        let weights = pf.particles().unwrap().weights().to_vec();
        assert_eq!(weights, vec![1.0; 3]);
        assert_eq!(pf.best_particle().unwrap().weight, 1.0);
        pf.resample().unwrap();
        assert_eq!(pf.particles().unwrap().len(), 3);
    }

    #[test]
    fn test_weights_from_log() {
        // Representable densities are left as they are.
        let plain = weights_from_log(&[0.5_f64.ln(), 0.25_f64.ln(), f64::NEG_INFINITY]);
        assert_approx_eq!(plain[0], 0.5, 1e-15);
        assert_approx_eq!(plain[1], 0.25, 1e-15);
        assert_eq!(plain[2], 0.0);
        // Overflowing and underflowing scores are shifted, keeping ratios.
        for base in [900.0, -900.0] {
            let shifted = weights_from_log(&[base, base - 2.0_f64.ln(), f64::NEG_INFINITY]);
            assert_eq!(shifted[0], 1.0);
            assert_approx_eq!(shifted[1], 0.5, 1e-12);
            assert_eq!(shifted[2], 0.0);
        }
        assert_eq!(weights_from_log(&[f64::NEG_INFINITY; 2]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_resample_all_zero_fails_and_keeps_set() {
        let mut pf = seeded(3);
        pf.init(0.0, 0.0, 0.0, STD).unwrap();
        pf.particles_mut().unwrap().set_weights(&[0.0, 0.0, 0.0]).unwrap();
        let before = pf.particles().unwrap().clone();
        assert!(matches!(
            pf.resample(),
            Err(FilterError::DegenerateWeights(_))
        ));
        assert_eq!(pf.particles().unwrap(), &before);
    }

    #[test]
    fn test_resample_single_support() {
        let mut pf = seeded(3);
        pf.init(0.0, 0.0, 0.0, [1.0, 1.0, 0.1]).unwrap();
        let first = pf.particles().unwrap().particles()[0];
        for _ in 0..50 {
            pf.particles_mut().unwrap().set_weights(&[1.0, 0.0, 0.0]).unwrap();
            pf.resample().unwrap();
            let set = pf.particles().unwrap();
            assert_eq!(set.len(), 3);
            for (i, p) in set.iter().enumerate() {
                assert_eq!(p.id, i);
                assert_eq!(p.pose(), first.pose());
            }
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = || {
            let mut pf = seeded(30);
            pf.init(4.0, 5.0, -1.5, [0.5, 0.5, 0.05]).unwrap();
            let obs = vec![Observation::new(0, 2.0, 2.0), Observation::new(0, 3.0, -2.0)];
            for _ in 0..3 {
                pf.predict(0.1, STD, 1.0, 0.1).unwrap();
                pf.update_weights(50.0, [0.3, 0.3], &obs, &map()).unwrap();
                pf.resample().unwrap();
            }
            pf.particles().unwrap().clone()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_associations_by_index() {
        let mut pf = seeded(2);
        pf.init(0.0, 0.0, 0.0, ZERO).unwrap();
        let map = vec![Landmark::new(8, 5.0, 0.0), Landmark::new(9, 0.0, 5.0)];
        let associations = pf
            .associations(1, 50.0, [0.3, 0.3], &[Observation::new(0, 0.0, 4.0)], &map)
            .unwrap();
        match associations[0] {
            Association::Matched(m) => assert_eq!(m.landmark_id, 9),
            Association::Unassociated => panic!("expected a match"),
        }
        assert!(pf.associations(2, 50.0, [0.3, 0.3], &[], &map).is_err());
    }

    #[test]
    fn test_debug_output() {
        let mut pf = seeded(5);
        assert!(format!("{:?}", pf).contains("initialized: false"));
        pf.init(0.0, 0.0, 0.0, STD).unwrap();
        let text = format!("{:?}", pf);
        assert!(text.contains("effective_particles"));
        assert!(text.contains("seed: 42"));
    }
}
