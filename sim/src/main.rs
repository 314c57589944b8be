//! SIRPF: a simulation and analysis tool for the landmark localization particle filter.
//!
//! This program has three commands:
//!
//! - `run`: Runs the filter over a scenario directory (map, controls, observations and optionally
//!   ground truth CSVs), logs a summary and optionally writes per-step results and the particle
//!   trajectory file.
//!
//! - `synth`: Generates a synthetic scenario from a landmark grid and a constant control.
//!
//! - `config`: Writes a template configuration file (TOML/JSON/YAML).
//!
//! Filter parameters come from the `--config` file when given; command line flags override them.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{
    ensure_parent_dir, init_logger, scenario_files, validate_input_file, validate_output_dir,
};
use log::{LevelFilter, info};
use std::error::Error;
use std::path::PathBuf;

use sirpf::measurements::AssociationPolicy;
use sirpf::particle::EstimateStrategy;
use sirpf::resample::ResamplingStrategy;
use sirpf::sim::{
    Scenario, SimulationConfig, SyntheticConfig, append_trajectory, grid_map, reset_trajectory, run,
    summarize, synthesize, write_csv,
};
use sirpf::{Control, Pose};

const LONG_ABOUT: &str = "SIRPF: A simulation and analysis tool for a sequential importance resampling particle filter
localizing a vehicle in 2-D against a map of point landmarks.

- run:    Run the filter over a scenario directory containing map.csv, controls.csv and
          observations.csv (and optionally ground_truth.csv).
- synth:  Generate a synthetic scenario directory from a landmark grid.
- config: Write a template configuration file.

Filter parameters are read from --config (TOML/JSON/YAML) when given; command line flags override them.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A simulation and analysis tool for landmark localization with a particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    /// Simulation configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(about = "Run the particle filter over a scenario directory")]
    Run(RunArgs),
    #[command(about = "Generate a synthetic scenario directory")]
    Synth(SynthArgs),
    #[command(about = "Write a template configuration file")]
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Scenario directory
    #[arg(short, long)]
    input: PathBuf,

    /// Per-step results CSV
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Trajectory file receiving one "x y theta" line per particle after every step
    #[arg(long)]
    trajectory: Option<PathBuf>,

    #[command(flatten)]
    filter: FilterOverrides,
}

/// Overrides applied on top of the loaded or default configuration
#[derive(Args, Clone, Debug, Default)]
struct FilterOverrides {
    /// Number of particles
    #[arg(short = 'n', long)]
    particles: Option<usize>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    resampling: Option<ResamplingStrategy>,

    #[arg(long, value_enum)]
    association: Option<AssociationPolicy>,

    #[arg(long, value_enum)]
    estimate: Option<EstimateStrategy>,

    /// Sensor range (m)
    #[arg(long)]
    sensor_range: Option<f64>,

    /// Time step (s)
    #[arg(long)]
    delta_t: Option<f64>,
}

impl FilterOverrides {
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(n) = self.particles {
            config.filter.num_particles = n;
        }
        if let Some(seed) = self.seed {
            config.filter.seed = Some(seed);
        }
        if let Some(resampling) = self.resampling {
            config.filter.resampling = resampling;
        }
        if let Some(association) = self.association {
            config.filter.association = association;
        }
        if let Some(estimate) = self.estimate {
            config.filter.estimate = estimate;
        }
        if let Some(range) = self.sensor_range {
            config.sensor_range = range;
        }
        if let Some(dt) = self.delta_t {
            config.delta_t = dt;
        }
    }
}

#[derive(Args, Clone, Debug)]
struct SynthArgs {
    /// Output scenario directory
    #[arg(short, long)]
    output: PathBuf,

    /// Landmarks per side of the square grid
    #[arg(long, default_value_t = 11)]
    grid: usize,

    /// Distance between neighboring landmarks (m)
    #[arg(long, default_value_t = 10.0)]
    spacing: f64,

    #[arg(long, default_value_t = 100)]
    steps: usize,

    /// Forward velocity (m/s)
    #[arg(long, default_value_t = 5.0)]
    velocity: f64,

    /// Yaw rate (rad/s)
    #[arg(long, default_value_t = 0.05, allow_negative_numbers = true)]
    yaw_rate: f64,

    #[arg(long, default_value_t = 0.1)]
    delta_t: f64,

    #[arg(long, default_value_t = 50.0)]
    sensor_range: f64,

    /// Observation noise standard deviation (m), applied to both axes
    #[arg(long, default_value_t = 0.1)]
    noise: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Starting pose x y theta
    #[arg(long, num_args = 3, value_names = ["X", "Y", "THETA"], allow_negative_numbers = true)]
    start: Option<Vec<f64>>,
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Output path; format is chosen by extension (.toml, .json, .yaml)
    #[arg(short, long, default_value = "sirpf.toml")]
    output: PathBuf,
}

fn run_scenario(args: &RunArgs, mut config: SimulationConfig) -> Result<(), Box<dyn Error>> {
    args.filter.apply(&mut config);
    let files = scenario_files(&args.input)?;
    info!("Loading scenario from {}", args.input.display());
    let scenario = Scenario::load(
        &files.map,
        &files.controls,
        &files.observations,
        files.ground_truth.as_ref(),
    )?;
    info!(
        "{} landmarks, {} steps, {} particles",
        scenario.map.len(),
        scenario.steps(),
        config.filter.num_particles
    );

    if let Some(path) = &args.trajectory {
        ensure_parent_dir(path)?;
        reset_trajectory(path)?;
    }
    let results = run(&scenario, &config, |_, pf| match &args.trajectory {
        Some(path) => append_trajectory(path, pf.particles()?),
        None => Ok(()),
    })?;

    match summarize(&results) {
        Some(summary) => println!("{summary}"),
        None => println!("{} steps (no ground truth)", results.len()),
    }
    if let Some(output) = &args.output {
        ensure_parent_dir(output)?;
        write_csv(&results, output)?;
        info!("Results written to {}", output.display());
    }
    Ok(())
}

fn synth(args: &SynthArgs) -> Result<(), Box<dyn Error>> {
    validate_output_dir(&args.output)?;
    let initial_pose = match args.start.as_deref() {
        Some([x, y, theta]) => Pose::new(*x, *y, *theta),
        Some(_) => return Err("--start takes exactly three values".into()),
        None => Pose::default(),
    };
    let config = SyntheticConfig {
        initial_pose,
        control: Control::new(args.velocity, args.yaw_rate),
        steps: args.steps,
        delta_t: args.delta_t,
        sensor_range: args.sensor_range,
        observation_noise: [args.noise, args.noise],
        seed: args.seed,
    };
    let scenario = synthesize(&grid_map(args.grid, args.spacing), &config)?;
    scenario.save(&args.output)?;
    info!(
        "Wrote {} steps over {} landmarks to {}",
        scenario.steps(),
        scenario.map.len(),
        args.output.display()
    );
    println!("Scenario written to {}", args.output.display());
    Ok(())
}

fn write_config(args: &ConfigArgs, config: &SimulationConfig) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    config.to_file(&args.output)?;
    println!("Configuration written to {}", args.output.display());
    println!("\nYou can now run the filter with:");
    println!("  sirpf --config {} run --input <scenario dir>", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(cli.log_level, cli.log_file.as_ref())?;

    let config = match &cli.config {
        Some(path) => {
            validate_input_file(path)?;
            info!("Loading configuration from {}", path.display());
            SimulationConfig::from_file(path)?
        }
        None => SimulationConfig::default(),
    };

    match &cli.command {
        Command::Run(args) => run_scenario(args, config),
        Command::Synth(args) => synth(args),
        Command::Config(args) => write_config(args, &config),
    }
}
