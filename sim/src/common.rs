//! Common utility functions for the simulation binary.
//!
//! This module contains shared utilities for the CLI including:
//! - Logger initialization
//! - Path validation
//! - Scenario directory layout

use log::LevelFilter;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File names of a scenario directory, as written by `Scenario::save`.
pub const MAP_FILE: &str = "map.csv";
pub const CONTROLS_FILE: &str = "controls.csv";
pub const OBSERVATIONS_FILE: &str = "observations.csv";
pub const GROUND_TRUTH_FILE: &str = "ground_truth.csv";

/// Install the `sirpf` logger.
///
/// Records from the filter library and this binary (both under the `sirpf` target) are emitted at `level`;
/// every other crate is held to warnings. Each line reads `{timestamp} [{level}] - {message}` with a local
/// millisecond timestamp. With `log_file` set, lines are appended to that file instead of stderr, so
/// repeated runs over several scenarios accumulate in one log.
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(level: LevelFilter, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(LevelFilter::Warn.min(level))
        .filter_module("sirpf", level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        });

    if let Some(log_path) = log_file {
        ensure_parent_dir(log_path)?;
        let file = OpenOptions::new().create(true).append(true).open(log_path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

/// Validate that an input path exists and is a file.
///
/// # Errors
/// Returns an error if the path does not exist or is not a regular file.
pub fn validate_input_file(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_file() {
        return Err(format!("Input path '{}' is not a file.", input.display()).into());
    }
    Ok(())
}

/// Validate output directory, creating it if it does not exist.
///
/// # Errors
/// Returns an error if the path exists but is not a directory, or if creation fails.
pub fn validate_output_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.exists() && !output.is_dir() {
        return Err(format!("Output path '{}' is not a directory.", output.display()).into());
    }
    std::fs::create_dir_all(output)?;
    Ok(())
}

/// Create the parent directory of an output file if needed.
pub fn ensure_parent_dir(output: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Paths of the CSV files making up a scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioFiles {
    pub map: PathBuf,
    pub controls: PathBuf,
    pub observations: PathBuf,
    pub ground_truth: Option<PathBuf>,
}

/// Resolve the scenario files in `dir`. The map, controls and observations files are required; the
/// ground truth file is picked up when present.
///
/// # Errors
/// Returns an error if `dir` is not a directory or a required file is missing.
pub fn scenario_files(dir: &Path) -> Result<ScenarioFiles, Box<dyn Error>> {
    if !dir.is_dir() {
        return Err(format!("Scenario path '{}' is not a directory.", dir.display()).into());
    }
    let required = |name: &str| -> Result<PathBuf, Box<dyn Error>> {
        let path = dir.join(name);
        validate_input_file(&path)?;
        Ok(path)
    };
    let ground_truth = dir.join(GROUND_TRUTH_FILE);
    Ok(ScenarioFiles {
        map: required(MAP_FILE)?,
        controls: required(CONTROLS_FILE)?,
        observations: required(OBSERVATIONS_FILE)?,
        ground_truth: ground_truth.is_file().then_some(ground_truth),
    })
}
