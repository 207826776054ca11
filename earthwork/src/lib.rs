//! Earthwork volumes and platform elevation search.
//!
//! Given an [ElevationGrid](elevation::ElevationGrid) and the
//! footprints of a crane platform and its related surfaces, this crate
//! finds the platform elevation (and optionally the ramp slope and
//! storage area offset) that minimises earthwork.
//!
//! # Example
//!
//! ```no_run
//! use earthwork::{optimize, ExecutionContext, GridSource, ProjectSpec};
//! use elevation::GridMode;
//!
//! let project = ProjectSpec::load("project.json")?;
//! let grid = GridSource {
//!     path: "terrain.egrid".into(),
//!     mode: GridMode::MemMap,
//! };
//! let outcome = optimize(&ExecutionContext::new(project, grid))?;
//! println!("platform at {:.2} m", outcome.params.platform_height);
//! # Ok::<(), earthwork::EarthworkError>(())
//! ```

mod context;
mod error;
pub mod executor;
mod math;
pub mod project;
pub mod sampler;
pub mod scenario;
pub mod search;
pub mod volume;

pub use crate::{
    context::{CancelToken, ExecutionContext, LogProgress, Phase, ProgressEvent, ProgressSink},
    error::{EarthworkError, FailureCause, FailureKind},
    executor::{Backend, Executor, ExecutorConfig, GridSource},
    project::{ProjectConfig, ProjectSpec},
    sampler::SamplingMethod,
    scenario::{evaluate, Evaluator, ScenarioParams, ScenarioResult},
    search::{optimize, optimize_with, OptimizationOutcome, SearchMode},
};
