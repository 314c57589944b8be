//! Simulation utilities and CSV data loading for landmark localization.
//!
//! This module provides the external collaborators around the filter:
//! - CSV records for the map, per-step controls, per-step observations and ground truth
//! - [`Scenario`] for loading and saving a complete run
//! - [`run`], the predict/update/resample simulation loop with a uniform-resampling fallback
//! - [`write_trajectory`] and [`append_trajectory`] for the "x y theta" per-particle trajectory file
//! - [`synthesize`] for generating noise-controlled scenarios from a map
//!
//! None of these are called from inside the filter itself.
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{FilterError, Result, ensure_non_negative};
use crate::filter::{FilterConfig, ParticleFilter};
use crate::measurements::landmarks_in_range;
use crate::motion::MotionModel;
use crate::particle::ParticleSet;
use crate::sampling::Sampler;
use crate::{Control, Landmark, Observation, Pose, wrap_to_pi};

/// Control input applied between `step` and `step + 1`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ControlRecord {
    pub step: usize,
    /// Forward velocity in m/s
    pub velocity: f64,
    /// Yaw rate in rad/s
    pub yaw_rate: f64,
}

/// One vehicle-frame landmark observation taken at `step`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ObservationRecord {
    pub step: usize,
    pub x: f64,
    pub y: f64,
}

/// True vehicle pose at `step`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct GroundTruthRecord {
    pub step: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Filter output for a single time step, recorded after the measurement update.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Euclidean position error against ground truth in meters
    pub position_error: Option<f64>,
    /// Absolute wrapped heading error against ground truth in radians
    pub heading_error: Option<f64>,
    pub effective_sample_size: f64,
    pub max_weight: f64,
}

/// Read every row of a headed CSV file.
pub fn read_csv<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

/// Write rows to a headed CSV file, replacing any existing file.
pub fn write_csv<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one "x y theta" line per particle.
pub fn write_trajectory<W: Write>(writer: &mut W, particles: &ParticleSet) -> io::Result<()> {
    for p in particles.iter() {
        writeln!(writer, "{} {} {}", p.x, p.y, p.theta)?;
    }
    Ok(())
}

/// Append the current particle poses to the trajectory file at `path`, creating it if needed.
pub fn append_trajectory<P: AsRef<Path>>(path: P, particles: &ParticleSet) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    write_trajectory(&mut writer, particles)?;
    writer.flush()?;
    Ok(())
}

/// Parameters for a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time between steps in seconds
    pub delta_t: f64,
    /// Sensor range in meters
    pub sensor_range: f64,
    /// Initialization and process noise [std x (m), std y (m), std theta (rad)]
    pub sigma_pos: [f64; 3],
    /// Landmark observation noise [std x (m), std y (m)]
    pub sigma_landmark: [f64; 2],
    /// Pose to initialize around; falls back to the first ground truth pose
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_pose: Option<Pose>,
    pub filter: FilterConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            delta_t: 0.1,
            sensor_range: 50.0,
            sigma_pos: [0.3, 0.3, 0.01],
            sigma_landmark: [0.3, 0.3],
            initial_pose: None,
            filter: FilterConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }

    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }

    /// Write in the format named by the file extension (.json, .yaml/.yml or .toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }

    /// Read in the format named by the file extension (.json, .yaml/.yml or .toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported config file extension: {}", path.display()),
    )
}

/// A complete localization run: map, per-step controls and observations, and optional ground truth.
///
/// `controls[k]` moves the vehicle from step `k` to step `k + 1`; `observations[k]` are taken at step `k`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    pub map: Vec<Landmark>,
    pub controls: Vec<Control>,
    pub observations: Vec<Vec<Observation>>,
    pub ground_truth: Vec<Pose>,
}

impl Scenario {
    /// Assemble a scenario from CSV rows. The number of steps is the number of control rows; control and
    /// ground truth rows must be listed in step order.
    pub fn from_records(
        map: Vec<Landmark>,
        controls: &[ControlRecord],
        observations: &[ObservationRecord],
        ground_truth: &[GroundTruthRecord],
    ) -> Result<Self> {
        let steps = controls.len();
        if let Some((i, c)) = controls.iter().enumerate().find(|(i, c)| c.step != *i) {
            return Err(FilterError::Config(format!(
                "control row {i} has step {}, expected {i}",
                c.step
            )));
        }
        let mut grouped = vec![Vec::new(); steps];
        for obs in observations {
            let frame = grouped.get_mut(obs.step).ok_or_else(|| {
                FilterError::Config(format!(
                    "observation at step {} but only {steps} control steps",
                    obs.step
                ))
            })?;
            let id = frame.len() as i32;
            frame.push(Observation::new(id, obs.x, obs.y));
        }
        if !ground_truth.is_empty() {
            if ground_truth.len() != steps {
                return Err(FilterError::Config(format!(
                    "{} ground truth rows for {steps} steps",
                    ground_truth.len()
                )));
            }
            if let Some((i, g)) = ground_truth.iter().enumerate().find(|(i, g)| g.step != *i) {
                return Err(FilterError::Config(format!(
                    "ground truth row {i} has step {}, expected {i}",
                    g.step
                )));
            }
        }
        Ok(Scenario {
            map,
            controls: controls
                .iter()
                .map(|c| Control::new(c.velocity, c.yaw_rate))
                .collect(),
            observations: grouped,
            ground_truth: ground_truth
                .iter()
                .map(|g| Pose::new(g.x, g.y, g.theta))
                .collect(),
        })
    }

    /// Load a scenario from CSV files.
    pub fn load<P: AsRef<Path>>(
        map: P,
        controls: P,
        observations: P,
        ground_truth: Option<P>,
    ) -> Result<Self> {
        let map: Vec<Landmark> = read_csv(map)?;
        let controls: Vec<ControlRecord> = read_csv(controls)?;
        let observations: Vec<ObservationRecord> = read_csv(observations)?;
        let ground_truth: Vec<GroundTruthRecord> = match ground_truth {
            Some(path) => read_csv(path)?,
            None => Vec::new(),
        };
        Scenario::from_records(map, &controls, &observations, &ground_truth)
    }

    /// Write `map.csv`, `controls.csv`, `observations.csv` and (when present) `ground_truth.csv` into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_csv(&self.map, dir.join("map.csv"))?;
        let controls: Vec<ControlRecord> = self
            .controls
            .iter()
            .enumerate()
            .map(|(step, c)| ControlRecord {
                step,
                velocity: c.velocity,
                yaw_rate: c.yaw_rate,
            })
            .collect();
        write_csv(&controls, dir.join("controls.csv"))?;
        let observations: Vec<ObservationRecord> = self
            .observations
            .iter()
            .enumerate()
            .flat_map(|(step, frame)| {
                frame.iter().map(move |o| ObservationRecord {
                    step,
                    x: o.x,
                    y: o.y,
                })
            })
            .collect();
        write_csv(&observations, dir.join("observations.csv"))?;
        if !self.ground_truth.is_empty() {
            let ground_truth: Vec<GroundTruthRecord> = self
                .ground_truth
                .iter()
                .enumerate()
                .map(|(step, p)| GroundTruthRecord {
                    step,
                    x: p.x,
                    y: p.y,
                    theta: p.theta,
                })
                .collect();
            write_csv(&ground_truth, dir.join("ground_truth.csv"))?;
        }
        Ok(())
    }

    pub fn steps(&self) -> usize {
        self.controls.len()
    }
}

/// Run the filter over every step of `scenario`.
///
/// Step 0 initializes around `config.initial_pose` (or the first ground truth pose). Each later step
/// predicts with the previous step's control. Every step then updates weights, records a [`StepResult`],
/// resamples, and finally hands the filter to `on_step`. When every weight is zero the step falls back to
/// resampling with uniform weights.
pub fn run<F>(scenario: &Scenario, config: &SimulationConfig, mut on_step: F) -> Result<Vec<StepResult>>
where
    F: FnMut(usize, &ParticleFilter) -> Result<()>,
{
    ensure_non_negative("delta_t", config.delta_t)?;
    let initial = config
        .initial_pose
        .or_else(|| scenario.ground_truth.first().copied())
        .ok_or_else(|| {
            FilterError::Config("no initial pose: set initial_pose or provide ground truth".to_string())
        })?;
    let mut pf = ParticleFilter::new(config.filter.clone())?;
    pf.init(initial.x, initial.y, initial.theta, config.sigma_pos)?;

    let mut results = Vec::with_capacity(scenario.steps());
    for step in 0..scenario.steps() {
        if step > 0 {
            let control = scenario.controls[step - 1];
            pf.predict(
                config.delta_t,
                config.sigma_pos,
                control.velocity,
                control.yaw_rate,
            )?;
        }
        pf.update_weights(
            config.sensor_range,
            config.sigma_landmark,
            &scenario.observations[step],
            &scenario.map,
        )?;

        let estimate = pf.estimate()?;
        let truth = scenario.ground_truth.get(step);
        let result = StepResult {
            step,
            x: estimate.x,
            y: estimate.y,
            theta: estimate.theta,
            position_error: truth.map(|t| t.distance_to(estimate.x, estimate.y)),
            heading_error: truth.map(|t| wrap_to_pi(estimate.theta - t.theta).abs()),
            effective_sample_size: pf.effective_sample_size()?,
            max_weight: pf.best_particle()?.weight,
        };

        match pf.resample() {
            Ok(()) => {}
            Err(FilterError::DegenerateWeights(reason)) => {
                warn!("Step {step}: {reason}; resampling with uniform weights");
                let set = pf.particles_mut()?;
                let uniform = vec![1.0; set.len()];
                set.set_weights(&uniform)?;
                pf.resample()?;
            }
            Err(e) => return Err(e),
        }
        on_step(step, &pf)?;
        results.push(result);
    }
    if let Some(summary) = summarize(&results) {
        info!("{summary}");
    }
    Ok(results)
}

/// Mean and maximum errors over a run, when ground truth was available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub mean_position_error: f64,
    pub max_position_error: f64,
    pub mean_heading_error: f64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} steps, mean position error {:.3} m (max {:.3} m), mean heading error {:.4} rad",
            self.steps, self.mean_position_error, self.max_position_error, self.mean_heading_error
        )
    }
}

pub fn summarize(results: &[StepResult]) -> Option<RunSummary> {
    let position: Vec<f64> = results.iter().filter_map(|r| r.position_error).collect();
    let heading: Vec<f64> = results.iter().filter_map(|r| r.heading_error).collect();
    if position.is_empty() {
        return None;
    }
    Some(RunSummary {
        steps: results.len(),
        mean_position_error: position.iter().sum::<f64>() / position.len() as f64,
        max_position_error: position.iter().cloned().fold(0.0, f64::max),
        mean_heading_error: heading.iter().sum::<f64>() / heading.len().max(1) as f64,
    })
}

/// Parameters for [`synthesize`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub initial_pose: Pose,
    /// Constant control applied at every step
    pub control: Control,
    pub steps: usize,
    pub delta_t: f64,
    pub sensor_range: f64,
    /// Observation noise [std x (m), std y (m)] in the vehicle frame
    pub observation_noise: [f64; 2],
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            initial_pose: Pose::new(0.0, 0.0, 0.0),
            control: Control::new(5.0, 0.05),
            steps: 100,
            delta_t: 0.1,
            sensor_range: 50.0,
            observation_noise: [0.1, 0.1],
            seed: 42,
        }
    }
}

/// A square grid of landmarks with `spacing` meters between neighbors, centered on the origin.
pub fn grid_map(per_side: usize, spacing: f64) -> Vec<Landmark> {
    let offset = (per_side as f64 - 1.0) * spacing / 2.0;
    (0..per_side * per_side)
        .map(|i| {
            let row = i / per_side;
            let col = i % per_side;
            Landmark::new(
                i as i32 + 1,
                col as f64 * spacing - offset,
                row as f64 * spacing - offset,
            )
        })
        .collect()
}

/// Generate a scenario by driving noise-free under a constant control and observing every landmark in
/// range with Gaussian noise in the vehicle frame.
pub fn synthesize(map: &[Landmark], config: &SyntheticConfig) -> Result<Scenario> {
    MotionModel::validate(config.delta_t, &config.control)?;
    ensure_non_negative("sensor range", config.sensor_range)?;
    let motion = MotionModel::default();
    let mut sampler = Sampler::from_seed(config.seed);
    let noise_x = Sampler::normal(0.0, config.observation_noise[0])?;
    let noise_y = Sampler::normal(0.0, config.observation_noise[1])?;

    let mut pose = config.initial_pose;
    let mut scenario = Scenario {
        map: map.to_vec(),
        ..Scenario::default()
    };
    for _ in 0..config.steps {
        let to_vehicle = pose.isometry().inverse();
        let frame = landmarks_in_range(&pose, map, config.sensor_range)
            .iter()
            .enumerate()
            .map(|(i, landmark)| {
                let local = to_vehicle * landmark.position();
                Observation::new(
                    i as i32,
                    local.x + sampler.sample(&noise_x),
                    local.y + sampler.sample(&noise_y),
                )
            })
            .collect();
        scenario.ground_truth.push(pose);
        scenario.observations.push(frame);
        scenario.controls.push(config.control);
        pose = motion.propagate(&pose, &config.control, config.delta_t);
    }
    Ok(scenario)
}

/// Create (or truncate) the trajectory file so a run starts from an empty file.
pub fn reset_trajectory<P: AsRef<Path>>(path: P) -> Result<()> {
    File::create(path)?;
    Ok(())
}
