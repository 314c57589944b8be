//! Sequential importance resampling particle filter for 2-D landmark localization
//!
//! This crate estimates the planar pose (position and heading) of a moving vehicle by fusing noisy odometry
//! (velocity and yaw rate) with noisy range-limited landmark observations against a known map. The filter
//! is a textbook Sequential Importance Resampling (SIR) particle filter: a fixed population of pose
//! hypotheses is propagated through a kinematic motion model, weighted by how well each hypothesis explains
//! the current observations, and then redrawn with probability proportional to those weights.
//!
//! The crate does not read sensors, build maps, or visualize anything. Map loading, trajectory persistence and
//! the driving simulation loop live in the [`sim`] module and are never called from the
//! predict/update/resample path.
//!
//! # Coordinate and state definitions
//!
//! Each particle carries the three-state pose
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! Where:
//! - $p_x$ and $p_y$ are the global (map frame) positions in meters.
//! - $\theta$ is the heading in radians, measured counter-clockwise from the map $x$ axis.
//!
//! Observations arrive in the vehicle frame, with $x$ pointing along the heading and $y$ to the left.
//!
//! ## Motion model
//!
//! Given velocity $v$, yaw rate $\omega$ and elapsed time $\Delta t$ the constant turn rate and velocity
//! model gives
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
//! which degenerates to straight-line motion as $\omega \rightarrow 0$. See [`motion`].
//!
//! ## Measurement model
//!
//! Observations are moved into the map frame with the particle's pose, associated to their nearest in-range
//! landmark, and scored with an uncorrelated bivariate Gaussian:
//!
//! $$
//! w = \prod_i \frac{1}{2 \pi \sigma_x \sigma_y} \exp \left( -\frac{(x_i - \mu_{x,i})^2}{2 \sigma_x^2} - \frac{(y_i - \mu_{y,i})^2}{2 \sigma_y^2} \right)
//! $$
//!
//! See [`measurements`].
//!
//! # Usage
//!
//! ```rust
//! use sirpf::filter::{FilterConfig, ParticleFilter};
//! use sirpf::{Landmark, Observation};
//!
//! let config = FilterConfig { seed: Some(7), ..FilterConfig::default() };
//! let mut pf = ParticleFilter::new(config).unwrap();
//! pf.init(0.0, 0.0, 0.0, [0.3, 0.3, 0.01]).unwrap();
//!
//! let map = vec![Landmark::new(1, 5.0, 0.0)];
//! let observations = vec![Observation::new(0, 3.0, 0.0)];
//!
//! pf.predict(0.1, [0.3, 0.3, 0.01], 20.0, 0.0).unwrap();
//! pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
//! pf.resample().unwrap();
//! let pose = pf.estimate().unwrap();
//! assert!((pose.x - 2.0).abs() < 1.0);
//! ```
pub mod error;
pub mod filter;
pub mod measurements;
pub mod motion;
pub mod particle;
pub mod resample;
pub mod sampling;
pub mod sim;

pub use error::{FilterError, Result};
pub use filter::{FilterConfig, ParticleFilter};

use nalgebra::{Isometry2, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Planar pose of the vehicle or of a single particle hypothesis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Global x position in meters
    pub x: f64,
    /// Global y position in meters
    pub y: f64,
    /// Heading in radians
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4} rad)", self.x, self.y, self.theta)
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Pose {
        Pose { x, y, theta }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    /// Rigid transform taking vehicle-frame coordinates into the map frame.
    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
    /// Euclidean distance between this pose's position and a map point.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        nalgebra::distance(&self.position(), &Point2::new(x, y))
    }
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }
}

/// A fixed, known point of interest on the map.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Map-supplied identifier
    pub id: i32,
    /// Global x position in meters
    pub x: f64,
    /// Global y position in meters
    pub y: f64,
}
impl Landmark {
    pub fn new(id: i32, x: f64, y: f64) -> Landmark {
        Landmark { id, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// A single landmark observation, either in the vehicle frame (as sensed) or in the map frame.
///
/// The identifier carries no meaning on arrival; association replaces it with the index of the matched
/// candidate landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i32,
    pub x: f64,
    pub y: f64,
}
impl Observation {
    pub fn new(id: i32, x: f64, y: f64) -> Observation {
        Observation { id, x, y }
    }
    pub fn point(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Odometry control input held constant over one time step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Yaw rate in rad/s
    pub yaw_rate: f64,
}
impl Control {
    pub fn new(velocity: f64, yaw_rate: f64) -> Control {
        Control { velocity, yaw_rate }
    }
}

/// Wrap an angle in radians to (-pi, pi]
pub fn wrap_to_pi(angle: f64) -> f64 {
    let wrapped = (angle + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI)
        - std::f64::consts::PI;
    if wrapped == -std::f64::consts::PI {
        std::f64::consts::PI
    } else {
        wrapped
    }
}
