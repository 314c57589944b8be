//! Range-limited landmark sensor model
//!
//! Scoring one particle against one frame of observations runs four stages:
//!
//! 1. [`landmarks_in_range`] culls the map to landmarks within sensor range of the particle.
//! 2. [`to_map_frame`] moves vehicle-frame observations into the map frame using the particle's pose:
//!    $x_g = x_p + x_l \cos\theta - y_l \sin\theta$, $y_g = y_p + x_l \sin\theta + y_l \cos\theta$.
//! 3. [`associate`] pairs each transformed observation with its nearest culled landmark.
//! 4. [`likelihood`] multiplies the bivariate Gaussian densities of every observation about its match.
//!
//! [`log_likelihood`] is the same product taken as a sum of log densities, and is what the filter scores
//! particles with. The plain product overflows past roughly 170 observations at a 5 cm landmark sigma.
//!
//! Each stage is a pure function of its inputs and returns newly built values.
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result, ensure_non_negative, ensure_positive};
use crate::{Landmark, Observation, Pose};

/// What to do with an observation when no landmark is within sensor range of the particle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum AssociationPolicy {
    /// Mark the observation [`Association::Unassociated`]; it contributes zero likelihood.
    #[default]
    Permissive,
    /// Fail with [`FilterError::EmptyCandidateSet`].
    Strict,
}

/// The candidate landmark an observation was matched to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    /// Index into the culled candidate list
    pub candidate: usize,
    /// Map identifier of the matched landmark
    pub landmark_id: i32,
    pub x: f64,
    pub y: f64,
    /// Euclidean distance from the observation to the landmark
    pub distance: f64,
}

/// Result of nearest-neighbor association for a single observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Association {
    Matched(Match),
    Unassociated,
}

impl Association {
    /// The matched landmark expressed as an observation: id is the candidate index, coordinates are the
    /// landmark's. This is the mean of the observation's likelihood term.
    pub fn mean(&self) -> Option<Observation> {
        match self {
            Association::Matched(m) => Some(Observation::new(m.candidate as i32, m.x, m.y)),
            Association::Unassociated => None,
        }
    }
}

/// Landmarks whose distance from the pose is at most `sensor_range`, in map order.
pub fn landmarks_in_range(pose: &Pose, map: &[Landmark], sensor_range: f64) -> Vec<Landmark> {
    map.iter()
        .filter(|landmark| pose.distance_to(landmark.x, landmark.y) <= sensor_range)
        .copied()
        .collect()
}

/// Transform vehicle-frame observations into the map frame. Length, order and identifiers are preserved.
pub fn to_map_frame(pose: &Pose, observations: &[Observation]) -> Vec<Observation> {
    let isometry = pose.isometry();
    observations
        .iter()
        .map(|obs| {
            let global = isometry * obs.point();
            Observation::new(obs.id, global.x, global.y)
        })
        .collect()
}

/// Nearest-neighbor association of map-frame observations to candidate landmarks.
///
/// Ties go to the first candidate in list order. With no candidates every observation is
/// [`Association::Unassociated`] under [`AssociationPolicy::Permissive`], and the call fails under
/// [`AssociationPolicy::Strict`].
pub fn associate(
    candidates: &[Landmark],
    observations: &[Observation],
    policy: AssociationPolicy,
) -> Result<Vec<Association>> {
    if candidates.is_empty() && !observations.is_empty() {
        return match policy {
            AssociationPolicy::Strict => Err(FilterError::EmptyCandidateSet {
                particle: None,
                observations: observations.len(),
            }),
            AssociationPolicy::Permissive => Ok(vec![Association::Unassociated; observations.len()]),
        };
    }
    Ok(observations
        .iter()
        .map(|obs| {
            let mut best: Option<Match> = None;
            for (j, landmark) in candidates.iter().enumerate() {
                let distance = nalgebra::distance(&obs.point(), &landmark.position());
                if best.is_none_or(|b| distance < b.distance) {
                    best = Some(Match {
                        candidate: j,
                        landmark_id: landmark.id,
                        x: landmark.x,
                        y: landmark.y,
                        distance,
                    });
                }
            }
            best.map_or(Association::Unassociated, Association::Matched)
        })
        .collect())
}

/// Density of an uncorrelated bivariate normal at (x, y).
pub fn bivariate_gaussian(x: f64, y: f64, mu_x: f64, mu_y: f64, std_x: f64, std_y: f64) -> f64 {
    let normalizer = 1.0 / (2.0 * std::f64::consts::PI * std_x * std_y);
    let exponent = (x - mu_x).powi(2) / (2.0 * std_x * std_x)
        + (y - mu_y).powi(2) / (2.0 * std_y * std_y);
    normalizer * (-exponent).exp()
}

/// Natural log of [`bivariate_gaussian`]. Finite for every finite residual.
pub fn log_bivariate_gaussian(
    x: f64,
    y: f64,
    mu_x: f64,
    mu_y: f64,
    std_x: f64,
    std_y: f64,
) -> f64 {
    let exponent = (x - mu_x).powi(2) / (2.0 * std_x * std_x)
        + (y - mu_y).powi(2) / (2.0 * std_y * std_y);
    -(2.0 * std::f64::consts::PI * std_x * std_y).ln() - exponent
}

/// Product of bivariate densities of each observation about its associated landmark.
///
/// The empty product is 1.0. An unassociated observation contributes a factor of zero.
pub fn likelihood(
    observations: &[Observation],
    associations: &[Association],
    std_landmark: [f64; 2],
) -> f64 {
    observations
        .iter()
        .zip(associations.iter())
        .map(|(obs, association)| match association.mean() {
            Some(mu) => bivariate_gaussian(
                obs.x,
                obs.y,
                mu.x,
                mu.y,
                std_landmark[0],
                std_landmark[1],
            ),
            None => 0.0,
        })
        .product()
}

/// Sum of log densities of each observation about its associated landmark.
///
/// The empty sum is 0.0. An unassociated observation contributes negative infinity.
pub fn log_likelihood(
    observations: &[Observation],
    associations: &[Association],
    std_landmark: [f64; 2],
) -> f64 {
    observations
        .iter()
        .zip(associations.iter())
        .map(|(obs, association)| match association.mean() {
            Some(mu) => log_bivariate_gaussian(
                obs.x,
                obs.y,
                mu.x,
                mu.y,
                std_landmark[0],
                std_landmark[1],
            ),
            None => f64::NEG_INFINITY,
        })
        .sum()
}

/// Range-limited landmark sensor with Gaussian position noise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandmarkSensor {
    pub sensor_range: f64,
    pub std_landmark: [f64; 2],
    pub policy: AssociationPolicy,
}

impl LandmarkSensor {
    pub fn new(sensor_range: f64, std_landmark: [f64; 2], policy: AssociationPolicy) -> Result<Self> {
        ensure_non_negative("sensor range", sensor_range)?;
        ensure_positive("landmark std x", std_landmark[0])?;
        ensure_positive("landmark std y", std_landmark[1])?;
        Ok(LandmarkSensor {
            sensor_range,
            std_landmark,
            policy,
        })
    }

    /// Cull, transform and associate for one particle pose.
    pub fn associations(
        &self,
        pose: &Pose,
        observations: &[Observation],
        map: &[Landmark],
    ) -> Result<(Vec<Observation>, Vec<Association>)> {
        let candidates = landmarks_in_range(pose, map, self.sensor_range);
        let transformed = to_map_frame(pose, observations);
        let associations = associate(&candidates, &transformed, self.policy)?;
        Ok((transformed, associations))
    }

    /// Importance weight of a particle at `pose` given vehicle-frame `observations`.
    pub fn weight(&self, pose: &Pose, observations: &[Observation], map: &[Landmark]) -> Result<f64> {
        let (transformed, associations) = self.associations(pose, observations, map)?;
        Ok(likelihood(&transformed, &associations, self.std_landmark))
    }

    /// Log of [`LandmarkSensor::weight`], computed without forming the product.
    pub fn log_weight(
        &self,
        pose: &Pose,
        observations: &[Observation],
        map: &[Landmark],
    ) -> Result<f64> {
        let (transformed, associations) = self.associations(pose, observations, map)?;
        Ok(log_likelihood(&transformed, &associations, self.std_landmark))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

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
    fn test_cull_keeps_map_order() {
        let pose = Pose::new(4.0, 5.0, 0.0);
        let culled = landmarks_in_range(&pose, &map(), 3.2);
        let ids: Vec<i32> = culled.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![1, 4, 5]);
    }

    #[test]
    fn test_cull_range_is_inclusive() {
        let pose = Pose::new(0.0, 0.0, 0.0);
        let map = vec![Landmark::new(9, 3.0, 4.0)];
        assert_eq!(landmarks_in_range(&pose, &map, 5.0).len(), 1);
        assert!(landmarks_in_range(&pose, &map, 4.999).is_empty());
    }

    #[test]
    fn test_transform_quarter_turn() {
        let pose = Pose::new(1.0, 1.0, FRAC_PI_2);
        let global = to_map_frame(&pose, &[Observation::new(7, 2.0, 0.0)]);
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].id, 7);
        assert_approx_eq!(global[0].x, 1.0, 1e-12);
        assert_approx_eq!(global[0].y, 3.0, 1e-12);
    }

    #[test]
    fn test_transform_matches_closed_form() {
        let pose = Pose::new(4.0, 5.0, -PI / 2.0);
        let obs = vec![
            Observation::new(0, 2.0, 2.0),
            Observation::new(1, 3.0, -2.0),
            Observation::new(2, 0.0, -4.0),
        ];
        let global = to_map_frame(&pose, &obs);
        assert_eq!(global.len(), obs.len());
        for (g, l) in global.iter().zip(obs.iter()) {
            let x = pose.x + l.x * pose.theta.cos() - l.y * pose.theta.sin();
            let y = pose.y + l.x * pose.theta.sin() + l.y * pose.theta.cos();
            assert_approx_eq!(g.x, x, 1e-12);
            assert_approx_eq!(g.y, y, 1e-12);
            assert_eq!(g.id, l.id);
        }
        assert_approx_eq!(global[0].x, 6.0, 1e-12);
        assert_approx_eq!(global[0].y, 3.0, 1e-12);
        assert_approx_eq!(global[2].x, 0.0, 1e-12);
        assert_approx_eq!(global[2].y, 5.0, 1e-12);
    }

    #[test]
    fn test_associate_coincident() {
        let candidates = map();
        let obs = vec![Observation::new(-1, 6.0, 1.0)];
        let associations = associate(&candidates, &obs, AssociationPolicy::Strict).unwrap();
        match associations[0] {
            Association::Matched(m) => {
                assert_eq!(m.candidate, 2);
                assert_eq!(m.landmark_id, 3);
                assert_eq!(m.distance, 0.0);
                assert_eq!((m.x, m.y), (6.0, 1.0));
            }
            Association::Unassociated => panic!("expected a match"),
        }
        let mean = associations[0].mean().unwrap();
        assert_eq!(mean, Observation::new(2, 6.0, 1.0));
    }

    #[test]
    fn test_associate_nearest_and_ties() {
        let candidates = vec![
            Landmark::new(10, 0.0, 0.0),
            Landmark::new(11, 2.0, 0.0),
            Landmark::new(12, 10.0, 0.0),
        ];
        let obs = vec![
            Observation::new(0, 1.0, 0.0), // equidistant from the first two
            Observation::new(1, 8.0, 1.0),
        ];
        let associations = associate(&candidates, &obs, AssociationPolicy::Permissive).unwrap();
        assert_eq!(associations[0].mean().unwrap().id, 0);
        assert_eq!(associations[1].mean().unwrap().id, 2);
    }

    #[test]
    fn test_associate_empty_candidates() {
        let obs = vec![Observation::new(0, 1.0, 0.0), Observation::new(1, 2.0, 0.0)];
        let permissive = associate(&[], &obs, AssociationPolicy::Permissive).unwrap();
        assert_eq!(permissive, vec![Association::Unassociated; 2]);
        assert!(matches!(
            associate(&[], &obs, AssociationPolicy::Strict),
            Err(FilterError::EmptyCandidateSet {
                particle: None,
                observations: 2
            })
        ));
        assert!(associate(&[], &[], AssociationPolicy::Strict).unwrap().is_empty());
    }

    #[test]
    fn test_weight_aligned_single_landmark() {
        let sensor = LandmarkSensor::new(50.0, [0.3, 0.3], AssociationPolicy::Permissive).unwrap();
        let pose = Pose::new(0.0, 0.0, 0.0);
        let map = vec![Landmark::new(1, 5.0, 0.0)];
        let w = sensor.weight(&pose, &[Observation::new(0, 5.0, 0.0)], &map).unwrap();
        let expected = 1.0 / (2.0 * PI * 0.09);
        assert_approx_eq!(w, expected, 1e-9);
        assert_approx_eq!(w, 1.768, 1e-3);
    }

    #[test]
    fn test_weight_two_landmarks_squares() {
        let sensor = LandmarkSensor::new(50.0, [0.3, 0.3], AssociationPolicy::Permissive).unwrap();
        let pose = Pose::new(1.0, 2.0, 0.3);
        let map = vec![Landmark::new(1, 6.0, 2.0), Landmark::new(2, 1.0, -8.0)];
        // Place the observations exactly where the landmarks appear from `pose`.
        let inverse = pose.isometry().inverse();
        let obs: Vec<Observation> = map
            .iter()
            .map(|l| {
                let local = inverse * l.position();
                Observation::new(0, local.x, local.y)
            })
            .collect();
        let w = sensor.weight(&pose, &obs, &map).unwrap();
        let single = 1.0 / (2.0 * PI * 0.09);
        assert_approx_eq!(w, single * single, 1e-6);
    }

    #[test]
    fn test_weight_decreases_with_residual() {
        let sensor = LandmarkSensor::new(50.0, [0.3, 0.3], AssociationPolicy::Permissive).unwrap();
        let map = vec![Landmark::new(1, 5.0, 0.0)];
        let obs = [Observation::new(0, 5.0, 0.0)];
        let aligned = sensor.weight(&Pose::new(0.0, 0.0, 0.0), &obs, &map).unwrap();
        let offset = sensor.weight(&Pose::new(0.3, 0.0, 0.0), &obs, &map).unwrap();
        assert!(offset < aligned);
        assert_approx_eq!(offset / aligned, (-0.5_f64).exp(), 1e-9);
    }

    #[test]
    fn test_empty_observations_weight_one() {
        let sensor = LandmarkSensor::new(50.0, [0.3, 0.3], AssociationPolicy::Strict).unwrap();
        let w = sensor.weight(&Pose::default(), &[], &map()).unwrap();
        assert_eq!(w, 1.0);
    }

    #[test]
    fn test_out_of_range_permissive_zero() {
        let sensor = LandmarkSensor::new(1.0, [0.3, 0.3], AssociationPolicy::Permissive).unwrap();
        let w = sensor
            .weight(&Pose::default(), &[Observation::new(0, 5.0, 0.0)], &map())
            .unwrap();
        assert_eq!(w, 0.0);
        let strict = LandmarkSensor::new(1.0, [0.3, 0.3], AssociationPolicy::Strict).unwrap();
        assert!(matches!(
            strict.weight(&Pose::default(), &[Observation::new(0, 5.0, 0.0)], &map()),
            Err(FilterError::EmptyCandidateSet { .. })
        ));
    }

    #[test]
    fn test_log_weight_matches_weight() {
        let sensor = LandmarkSensor::new(50.0, [0.3, 0.2], AssociationPolicy::Permissive).unwrap();
        let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
        let obs = vec![Observation::new(0, 2.0, 2.0), Observation::new(1, 3.0, -2.0)];
        let w = sensor.weight(&pose, &obs, &map()).unwrap();
        let log_w = sensor.log_weight(&pose, &obs, &map()).unwrap();
        assert_approx_eq!(log_w.exp(), w, 1e-12);
        assert_eq!(sensor.log_weight(&pose, &[], &map()).unwrap(), 0.0);
    }

    #[test]
    fn test_log_weight_stays_finite_where_product_overflows() {
        let sensor = LandmarkSensor::new(100.0, [0.05, 0.05], AssociationPolicy::Permissive).unwrap();
        let map: Vec<Landmark> = (0..200)
            .map(|i| Landmark::new(i, 1.0 + 0.1 * i as f64, 0.0))
            .collect();
        let obs: Vec<Observation> = map
            .iter()
            .map(|l| Observation::new(l.id, l.x, l.y))
            .collect();
        assert!(sensor.weight(&Pose::default(), &obs, &map).unwrap().is_infinite());
        let log_w = sensor.log_weight(&Pose::default(), &obs, &map).unwrap();
        let per_observation = -(2.0 * PI * 0.05 * 0.05).ln();
        assert_approx_eq!(log_w, 200.0 * per_observation, 1e-9);
    }

    #[test]
    fn test_log_weight_unassociated_is_negative_infinity() {
        let sensor = LandmarkSensor::new(1.0, [0.3, 0.3], AssociationPolicy::Permissive).unwrap();
        let log_w = sensor
            .log_weight(&Pose::default(), &[Observation::new(0, 5.0, 0.0)], &map())
            .unwrap();
        assert_eq!(log_w, f64::NEG_INFINITY);
    }

    #[test]
    fn test_sensor_rejects_bad_parameters() {
        assert!(LandmarkSensor::new(-1.0, [0.3, 0.3], AssociationPolicy::Permissive).is_err());
        assert!(LandmarkSensor::new(10.0, [0.0, 0.3], AssociationPolicy::Permissive).is_err());
        assert!(LandmarkSensor::new(10.0, [0.3, f64::NAN], AssociationPolicy::Permissive).is_err());
    }

    #[test]
    fn test_weight_is_pure() {
        let sensor = LandmarkSensor::new(50.0, [0.3, 0.3], AssociationPolicy::Permissive).unwrap();
        let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
        let obs = vec![Observation::new(0, 2.0, 2.0), Observation::new(1, 3.0, -2.0)];
        let a = sensor.weight(&pose, &obs, &map()).unwrap();
        let b = sensor.weight(&pose, &obs, &map()).unwrap();
        assert_eq!(a, b);
    }
}
