//! Error types for the particle filter

use thiserror::Error;

/// Particle filter error type
///
/// Every variant is reported synchronously at the offending call. None of them are recovered inside the
/// filter: the particle set is left as it was before the call.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Invalid particle count, standard deviation, time step or other caller-supplied parameter.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation other than `init` was called on an uninitialized filter.
    #[error("Particle filter has not been initialized")]
    NotInitialized,

    /// The weight vector does not define a discrete distribution (all zero, negative or non-finite).
    #[error("Degenerate weights: {0}")]
    DegenerateWeights(String),

    /// Strict association found no landmark within sensor range of a particle.
    #[error(
        "No landmark within sensor range{} to associate {observations} observation(s)",
        particle_suffix(.particle)
    )]
    EmptyCandidateSet {
        /// Index of the offending particle, when known
        particle: Option<usize>,
        observations: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, FilterError>;

fn particle_suffix(particle: &Option<usize>) -> String {
    particle.map(|i| format!(" of particle {i}")).unwrap_or_default()
}

impl FilterError {
    /// Attach a particle index to an [`FilterError::EmptyCandidateSet`]; other variants pass through.
    pub(crate) fn at_particle(self, index: usize) -> Self {
        match self {
            FilterError::EmptyCandidateSet { observations, .. } => FilterError::EmptyCandidateSet {
                particle: Some(index),
                observations,
            },
            other => other,
        }
    }
}

/// Reject NaN and infinite parameters.
pub(crate) fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FilterError::Config(format!("{name} must be finite, got {value}")))
    }
}

/// Reject negative (or non-finite) standard deviations and ranges.
pub(crate) fn ensure_non_negative(name: &str, value: f64) -> Result<()> {
    ensure_finite(name, value)?;
    if value < 0.0 {
        return Err(FilterError::Config(format!(
            "{name} must be non-negative, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_positive(name: &str, value: f64) -> Result<()> {
    ensure_finite(name, value)?;
    if value <= 0.0 {
        return Err(FilterError::Config(format!(
            "{name} must be strictly positive, got {value}"
        )));
    }
    Ok(())
}
