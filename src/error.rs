//! Error type shared by partitioning, dispatch and configuration

use std::fmt;
use thiserror::Error;

/// Which loop dimension an argument belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// The only dimension of a 1D loop, or the partitioned dimension of a 2D loop
    Outer,
    /// The replicated dimension of a 2D loop
    Inner,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Outer => write!(f, "outer"),
            Dimension::Inner => write!(f, "inner"),
        }
    }
}

/// Errors that can occur while partitioning or running a parallel loop
#[derive(Error, Debug)]
pub enum ForError {
    #[error("invalid {dimension} range: high ({high}) is below low ({low})")]
    InvalidRange {
        dimension: Dimension,
        low: i64,
        high: i64,
    },

    #[error("num_threads must be greater than 0, got {0}")]
    InvalidThreadCount(usize),

    #[error("failed to spawn worker {worker}")]
    WorkerSpawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },

    #[error("invalid value {value:?} for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },
}
