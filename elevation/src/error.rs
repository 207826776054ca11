use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported grid file extension {0}")]
    Extension(PathBuf),

    #[error("invalid grid header in {path}: {reason}")]
    Header { path: PathBuf, reason: String },

    #[error("invalid sample '{token}' at index {index}")]
    Sample { token: String, index: usize },

    #[error("grid dimensions {cols}x{rows} overflow")]
    Dimensions { cols: usize, rows: usize },

    #[error("grid has {actual} samples, expected {expected}")]
    SampleCount { expected: usize, actual: usize },

    #[error("cell size must be positive and finite, got {0}")]
    CellSize(f64),

    #[error("grid origin must be finite")]
    Origin,

    #[error("unsupported binary grid version {0}")]
    Version(u8),
}
