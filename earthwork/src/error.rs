use elevation::GridError;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EarthworkError {
    /// Invalid ranges, steps, geometry or coordinate reference.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Footprint does not intersect the grid, or the grid is unreadable.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Failure raised inside a pooled worker.
    #[error("worker error: {0}")]
    Worker(String),

    /// A single parameter point that cannot be evaluated.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("batch did not complete within {0:?}")]
    Timeout(Duration),

    #[error("all {failed} scenarios failed ({cause}): {source}")]
    AllScenariosFailed {
        failed: usize,
        cause: FailureCause,
        source: Box<EarthworkError>,
    },

    #[error("optimization cancelled")]
    Cancelled,

    #[error("{0}")]
    Grid(#[from] GridError),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Where a total batch failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Parallel dispatch failed but the same scenarios evaluate
    /// in-process.
    Infrastructure,

    /// The scenarios fail no matter where they run.
    Computation,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => f.write_str("parallel infrastructure failure"),
            Self::Computation => f.write_str("domain computation failure"),
        }
    }
}

/// Serializable classification of a per-scenario failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Sampling,
    Worker,
    InvalidScenario,
    Timeout,
}

impl EarthworkError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Sampling(_) | Self::Grid(_) => FailureKind::Sampling,
            Self::InvalidScenario(_) => FailureKind::InvalidScenario,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::AllScenariosFailed { source, .. } => source.kind(),
            Self::Worker(_) | Self::Cancelled | Self::Json(_) | Self::Io(_) => FailureKind::Worker,
        }
    }
}
