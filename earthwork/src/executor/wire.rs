//! Worker protocol.
//!
//! A worker receives one [WorkerRequest] as a single JSON line and
//! answers with one [WorkerReply] JSON line per unit, in evaluation
//! order. Requests carry plain data only; each worker decodes the
//! project and opens the grid itself.

use crate::{
    project::ProjectSpec,
    sampler::SamplingMethod,
    scenario::{Evaluator, ScenarioParams, ScenarioResult},
    EarthworkError, FailureKind,
};
use elevation::{ElevationGrid, GridMode};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    io::{BufRead, Write},
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    time::Instant,
};

pub const WIRE_VERSION: u32 = 1;

/// Where a worker finds the elevation grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSource {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: GridMode,
}

impl GridSource {
    pub fn open(&self) -> Result<ElevationGrid, EarthworkError> {
        ElevationGrid::open(&self.path, self.mode).map_err(|e| {
            EarthworkError::Sampling(format!("cannot open grid {:?}: {e}", self.path))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Scan index within the stage.
    pub index: usize,
    pub params: ScenarioParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub version: u32,
    pub project: ProjectSpec,
    pub grid: GridSource,
    #[serde(default)]
    pub method: SamplingMethod,
    pub units: Vec<WorkUnit>,
}

impl WorkerRequest {
    pub fn new(
        project: ProjectSpec,
        grid: GridSource,
        method: SamplingMethod,
        units: Vec<WorkUnit>,
    ) -> Self {
        Self {
            version: WIRE_VERSION,
            project,
            grid,
            method,
            units,
        }
    }

    /// Returns a request for a subset of this request's units.
    pub fn with_units(&self, units: Vec<WorkUnit>) -> Self {
        Self {
            version: self.version,
            project: self.project.clone(),
            grid: self.grid.clone(),
            method: self.method,
            units,
        }
    }
}

/// A scenario that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFailure {
    pub index: usize,
    pub params: ScenarioParams,
    pub kind: FailureKind,
    pub message: String,
}

impl ScenarioFailure {
    pub fn new(unit: &WorkUnit, err: &EarthworkError) -> Self {
        Self {
            index: unit.index,
            params: unit.params,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn worker(unit: &WorkUnit, message: impl Into<String>) -> Self {
        Self {
            index: unit.index,
            params: unit.params,
            kind: FailureKind::Worker,
            message: message.into(),
        }
    }

    /// Reconstructs the error this failure was recorded from.
    pub fn into_error(self) -> EarthworkError {
        let message = format!("{} ({})", self.message, self.params);
        match self.kind {
            FailureKind::Configuration => EarthworkError::Configuration(message),
            FailureKind::Sampling => EarthworkError::Sampling(message),
            FailureKind::Worker => EarthworkError::Worker(message),
            FailureKind::InvalidScenario => EarthworkError::InvalidScenario(message),
            FailureKind::Timeout => EarthworkError::Worker(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub version: u32,
    pub index: usize,
    pub outcome: Result<ScenarioResult, ScenarioFailure>,
}

impl WorkerReply {
    pub fn failed(failure: ScenarioFailure) -> Self {
        Self {
            version: WIRE_VERSION,
            index: failure.index,
            outcome: Err(failure),
        }
    }
}

/// A prepared evaluator, owned by one worker.
pub struct WorkerContext {
    evaluator: Evaluator,
}

impl WorkerContext {
    /// Decodes the project and opens the grid named in `request`.
    pub fn open(request: &WorkerRequest) -> Result<Self, EarthworkError> {
        if request.version != WIRE_VERSION {
            return Err(EarthworkError::Worker(format!(
                "wire version {} not supported, expected {WIRE_VERSION}",
                request.version
            )));
        }
        let now = Instant::now();
        let project = request.project.decode()?;
        let grid = request.grid.open()?;
        let evaluator = Evaluator::prepare(&project, &grid, request.method)?;
        debug!("worker context ready in {:?}", now.elapsed());
        Ok(Self { evaluator })
    }

    pub fn from_evaluator(evaluator: Evaluator) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Evaluates one unit. Panics are caught and reported as worker
    /// failures.
    pub fn run_unit(&self, unit: &WorkUnit) -> WorkerReply {
        let evaluated = catch_unwind(AssertUnwindSafe(|| self.evaluator.evaluate(&unit.params)));
        let outcome = match evaluated {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ScenarioFailure::new(unit, &e)),
            Err(panic) => Err(ScenarioFailure::worker(
                unit,
                format!("evaluation panicked: {}", panic_message(&*panic)),
            )),
        };
        WorkerReply {
            version: WIRE_VERSION,
            index: unit.index,
            outcome,
        }
    }

    /// Evaluates `units` in order.
    pub fn run(&self, units: &[WorkUnit]) -> Vec<WorkerReply> {
        units.iter().map(|unit| self.run_unit(unit)).collect()
    }
}

/// Replies to every unit of `request` with the same failure.
pub fn fail_all(request: &WorkerRequest, err: &EarthworkError) -> Vec<WorkerReply> {
    request
        .units
        .iter()
        .map(|unit| WorkerReply::failed(ScenarioFailure::new(unit, err)))
        .collect()
}

/// Serves one request read from `input`, writing replies to `output`.
///
/// Errors are returned only when the streams themselves fail; every
/// evaluation problem is reported in-band.
pub fn serve<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<usize, EarthworkError> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let request: WorkerRequest = serde_json::from_str(&line)?;
    debug!(
        "worker received {} units (wire version {})",
        request.units.len(),
        request.version
    );

    let mut written = 0;
    match WorkerContext::open(&request) {
        Ok(ctx) => {
            for unit in &request.units {
                write_reply(&mut output, &ctx.run_unit(unit))?;
                written += 1;
            }
        }
        Err(e) => {
            warn!("worker cannot evaluate request: {e}");
            for reply in fail_all(&request, &e) {
                write_reply(&mut output, &reply)?;
                written += 1;
            }
        }
    }
    Ok(written)
}

fn write_reply<W: Write>(output: &mut W, reply: &WorkerReply) -> Result<(), EarthworkError> {
    serde_json::to_writer(&mut *output, reply)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::{serve, GridSource, WorkUnit, WorkerReply, WorkerRequest, WIRE_VERSION};
    use crate::{
        project::tests::spec, sampler::tests::plane, scenario::ScenarioParams, FailureKind,
        SamplingMethod,
    };
    use elevation::GridMode;
    use std::io::Cursor;

    fn request(path: std::path::PathBuf, units: Vec<WorkUnit>) -> WorkerRequest {
        WorkerRequest::new(
            spec(),
            GridSource {
                path,
                mode: GridMode::MemMap,
            },
            SamplingMethod::Mask,
            units,
        )
    }

    fn serve_request(request: &WorkerRequest) -> Vec<WorkerReply> {
        let mut input = serde_json::to_vec(request).unwrap();
        input.push(b'\n');
        let mut output = Vec::new();
        serve(Cursor::new(input), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn units() -> Vec<WorkUnit> {
        vec![
            WorkUnit {
                index: 0,
                params: ScenarioParams {
                    platform_height: 103.0,
                    ramp_slope: Some(2.0),
                    storage_offset: Some(0.0),
                },
            },
            WorkUnit {
                index: 1,
                params: ScenarioParams {
                    platform_height: 103.0,
                    ramp_slope: Some(20.0),
                    storage_offset: Some(0.0),
                },
            },
        ]
    }

    #[test]
    fn test_serve_answers_every_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.egrid");
        plane(80, 80).save(&path).unwrap();

        let replies = serve_request(&request(path, units()));
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.version == WIRE_VERSION));
        assert!(replies[0].outcome.is_ok());
        let failure = replies[1].outcome.as_ref().unwrap_err();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.kind, FailureKind::InvalidScenario);
    }

    #[test]
    fn test_unreadable_grid_fails_every_unit() {
        let replies = serve_request(&request("/nonexistent/terrain.egrid".into(), units()));
        assert_eq!(replies.len(), 2);
        for reply in replies {
            assert_eq!(reply.outcome.unwrap_err().kind, FailureKind::Sampling);
        }
    }

    #[test]
    fn test_version_mismatch_is_worker_failure() {
        let mut request = request("/nonexistent/terrain.egrid".into(), units());
        request.version = WIRE_VERSION + 1;
        for reply in serve_request(&request) {
            assert_eq!(reply.outcome.unwrap_err().kind, FailureKind::Worker);
        }
    }
}
