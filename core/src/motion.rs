//! Constant turn rate and velocity (CTRV) motion model
//!
//! Propagates a pose forward by one time step given forward velocity $v$ and yaw rate $\omega$:
//!
//! $$
//! p_x(+) = p_x(-) + \frac{v}{\omega} \left( \sin(\theta + \omega \Delta t) - \sin\theta \right)
//! $$
//!
//! $$
//! p_y(+) = p_y(-) + \frac{v}{\omega} \left( \cos\theta - \cos(\theta + \omega \Delta t) \right)
//! $$
//!
//! $$
//! \theta(+) = \theta(-) + \omega \Delta t
//! $$
//!
//! When $|\omega|$ is at or below [`DEFAULT_YAW_RATE_EPSILON`] the straight-line limit is used instead:
//!
//! $$
//! p_x(+) = p_x(-) + v \Delta t \cos\theta, \quad p_y(+) = p_y(-) + v \Delta t \sin\theta, \quad \theta(+) = \theta(-)
//! $$
//!
//! The epsilon replaces an exact comparison against zero, so yaw rates that are numerically
//! indistinguishable from zero take the straight-line branch.
use rand_distr::Normal;

use crate::error::{FilterError, Result, ensure_finite, ensure_non_negative};
use crate::sampling::Sampler;
use crate::{Control, Pose};

/// Yaw rates with magnitude at or below this (rad/s) take the straight-line branch.
pub const DEFAULT_YAW_RATE_EPSILON: f64 = 1e-6;

/// Zero-mean additive process noise on (x, y, theta).
#[derive(Clone, Debug)]
pub struct ProcessNoise {
    x: Normal<f64>,
    y: Normal<f64>,
    theta: Normal<f64>,
}

impl ProcessNoise {
    /// Build from per-axis standard deviations `[std_x, std_y, std_theta]`.
    pub fn new(std: [f64; 3]) -> Result<Self> {
        ensure_non_negative("process noise std x", std[0])?;
        ensure_non_negative("process noise std y", std[1])?;
        ensure_non_negative("process noise std theta", std[2])?;
        Ok(ProcessNoise {
            x: Sampler::normal(0.0, std[0])?,
            y: Sampler::normal(0.0, std[1])?,
            theta: Sampler::normal(0.0, std[2])?,
        })
    }

    /// Add a fresh noise draw to each axis of `pose`.
    pub fn perturb(&self, pose: Pose, sampler: &mut Sampler) -> Pose {
        Pose::new(
            pose.x + sampler.sample(&self.x),
            pose.y + sampler.sample(&self.y),
            pose.theta + sampler.sample(&self.theta),
        )
    }
}

/// Kinematic motion model with a configurable straight-line threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionModel {
    pub yaw_rate_epsilon: f64,
}

impl Default for MotionModel {
    fn default() -> Self {
        MotionModel {
            yaw_rate_epsilon: DEFAULT_YAW_RATE_EPSILON,
        }
    }
}

impl MotionModel {
    pub fn new(yaw_rate_epsilon: f64) -> Result<Self> {
        ensure_non_negative("yaw rate epsilon", yaw_rate_epsilon)?;
        Ok(MotionModel { yaw_rate_epsilon })
    }

    /// Check a time step and control input before any particle is touched.
    pub fn validate(delta_t: f64, control: &Control) -> Result<()> {
        ensure_finite("delta_t", delta_t)?;
        if delta_t < 0.0 {
            return Err(FilterError::Config(format!(
                "delta_t must be non-negative, got {delta_t}"
            )));
        }
        ensure_finite("velocity", control.velocity)?;
        ensure_finite("yaw rate", control.yaw_rate)?;
        Ok(())
    }

    /// Noise-free propagation of a single pose.
    pub fn propagate(&self, pose: &Pose, control: &Control, delta_t: f64) -> Pose {
        let Control { velocity, yaw_rate } = *control;
        let theta = pose.theta;
        if yaw_rate.abs() > self.yaw_rate_epsilon {
            let theta_next = theta + yaw_rate * delta_t;
            let radius = velocity / yaw_rate;
            Pose::new(
                pose.x + radius * (theta_next.sin() - theta.sin()),
                pose.y + radius * (theta.cos() - theta_next.cos()),
                theta_next,
            )
        } else {
            let distance = velocity * delta_t;
            Pose::new(
                pose.x + distance * theta.cos(),
                pose.y + distance * theta.sin(),
                theta,
            )
        }
    }

    /// Propagate and add one draw of process noise.
    pub fn sample(
        &self,
        pose: &Pose,
        control: &Control,
        delta_t: f64,
        noise: &ProcessNoise,
        sampler: &mut Sampler,
    ) -> Pose {
        noise.perturb(self.propagate(pose, control, delta_t), sampler)
    }
}
