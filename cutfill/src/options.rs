use clap::{Args, Parser, ValueEnum};
use earthwork::SamplingMethod;
use elevation::GridMode;
use std::path::PathBuf;

/// Find the crane platform elevation that minimises earthwork.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub enum Cli {
    /// Search platform height (and optionally ramp slope and storage
    /// offset) for minimal earthwork.
    Optimize(Optimize),

    /// Evaluate a single scenario.
    Evaluate(Evaluate),

    /// Convert an elevation grid between `.asc` and `.egrid`.
    Convert(Convert),

    /// Serve one worker request on stdin/stdout.
    #[command(hide = true)]
    Worker(Worker),
}

#[derive(Debug, Clone, Args)]
pub struct Inputs {
    /// Elevation grid (`.asc` or `.egrid`).
    #[arg(short, long)]
    pub grid: PathBuf,

    /// Project spec (JSON).
    #[arg(short, long)]
    pub project: PathBuf,

    /// Memory map binary grids instead of reading them.
    #[arg(long)]
    pub memmap: bool,

    /// Sample footprints with per-cell point in polygon tests.
    #[arg(long)]
    pub legacy_sampling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Sequential,
    Threads,
    Processes,
}

#[derive(Debug, Clone, Args)]
pub struct Optimize {
    #[command(flatten)]
    pub inputs: Inputs,

    /// Parallel workers [default: available cores - 1].
    #[arg(short, long)]
    pub workers: Option<usize>,

    #[arg(short, long, value_enum, default_value_t = BackendArg::Processes)]
    pub backend: BackendArg,

    /// Smallest batch dispatched in parallel.
    #[arg(long, default_value_t = earthwork::executor::DEFAULT_PARALLEL_THRESHOLD)]
    pub threshold: usize,

    /// Per-batch timeout for parallel batches.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Fail instead of retrying a failed parallel batch in-process.
    #[arg(long)]
    pub no_fallback: bool,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct Evaluate {
    #[command(flatten)]
    pub inputs: Inputs,

    /// Platform elevation.
    #[arg(long)]
    pub height: f64,

    /// Ramp grade in percent [default: project value].
    #[arg(long, allow_negative_numbers = true)]
    pub slope: Option<f64>,

    /// Storage area offset [default: project value].
    #[arg(long, allow_negative_numbers = true)]
    pub offset: Option<f64>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct Convert {
    /// Source grid.
    pub input: PathBuf,

    /// Destination grid; format follows the extension.
    pub output: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct Worker {}

impl Inputs {
    pub fn grid_mode(&self) -> GridMode {
        if self.memmap {
            GridMode::MemMap
        } else {
            GridMode::InMem
        }
    }

    pub fn method(&self) -> SamplingMethod {
        if self.legacy_sampling {
            SamplingMethod::PerCell
        } else {
            SamplingMethod::Mask
        }
    }
}
