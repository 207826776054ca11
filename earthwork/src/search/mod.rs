//! Platform elevation search.
//!
//! With only the platform height to search, every fine-step height is
//! evaluated. With a ramp slope or storage offset in play, the full
//! fine-resolution product quickly grows to tens of thousands of
//! points, so the search first evaluates a coarse product and then a
//! fine product within one coarse step of the coarse optimum.

mod objective;
mod space;

pub use self::{
    objective::{Evaluated, Objective},
    space::{Axis, Dimension, SearchSpace},
};
use crate::{
    context::{ExecutionContext, Phase},
    executor::{Executor, ScenarioFailure, WorkUnit, WorkerContext, WorkerRequest},
    scenario::{Evaluator, ScenarioParams, ScenarioResult},
    EarthworkError,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Single scan when only height is searched, coarse-to-fine
    /// otherwise.
    #[default]
    Auto,

    /// Exhaustive scan at the fine step.
    Single,

    /// Coarse stage followed by a refined fine stage.
    CoarseToFine,
}

impl SearchMode {
    fn resolve(self, space: &SearchSpace) -> Self {
        match self {
            Self::Auto if space.is_single() => Self::Single,
            Self::Auto => Self::CoarseToFine,
            mode => mode,
        }
    }
}

/// Evaluation counts for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub phase: Phase,
    pub points: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub batches: usize,
    pub fallback_batches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub params: ScenarioParams,
    pub best: ScenarioResult,
    pub objective: Objective,

    /// Value of the objective for `best`.
    pub metric: f64,

    /// Successful evaluations over all stages.
    pub evaluated: usize,

    /// Failed evaluations over all stages.
    pub failed: usize,

    /// At least one batch was retried in-process.
    pub fallback_triggered: bool,

    pub failures: Vec<ScenarioFailure>,

    /// Best result of the coarse stage, when one ran.
    pub coarse_best: Option<ScenarioResult>,

    pub stages: Vec<StageSummary>,
    pub space: SearchSpace,

    /// Size of the full fine-resolution product.
    pub full_fine_points: usize,
}

/// Runs the search described by `ctx` using its executor settings.
pub fn optimize(ctx: &ExecutionContext) -> Result<OptimizationOutcome, EarthworkError> {
    let executor = Executor::new(ctx.executor.clone())?;
    optimize_with(ctx, &executor)
}

/// Runs the search described by `ctx` on `executor`.
pub fn optimize_with(
    ctx: &ExecutionContext,
    executor: &Executor,
) -> Result<OptimizationOutcome, EarthworkError> {
    let now = Instant::now();
    ctx.report(Phase::Prepare, 0.0, "sampling surfaces");
    let project = ctx.project.decode()?;
    let evaluator = {
        let grid = ctx.grid.open()?;
        Evaluator::prepare(&project, &grid, executor.config().method)?
    };
    let space = SearchSpace::new(&project.search, project.reference_elevation, &evaluator)?;
    let objective = Objective::new(project.optimize_for_net_earthwork);
    let mode = project.search.mode.resolve(&space);
    info!(
        "searching {} with {:?} over {:?} ({} fine points in full)",
        space
            .dimensions()
            .iter()
            .map(|d| format!("{} [{}, {}]", d.axis, d.min, d.max))
            .collect::<Vec<_>>()
            .join(", "),
        objective,
        mode,
        space.fine_point_count()
    );

    let mut search = Search {
        ctx,
        executor,
        local: WorkerContext::from_evaluator(evaluator),
        objective,
        stages: Vec::new(),
        failures: Vec::new(),
        evaluated: 0,
    };

    let (best, coarse_best) = match mode {
        SearchMode::CoarseToFine => {
            let coarse = search.stage(Phase::Coarse, space.coarse_points(), (0.0, 50.0))?;
            let window = space.refine_points(&coarse.params);
            let fine = search.stage(Phase::Fine, window, (50.0, 100.0))?;
            let best = if objective.compare_volumes(&fine.result, &coarse.result).is_lt() {
                fine
            } else {
                coarse.clone()
            };
            (best, Some(coarse.result))
        }
        SearchMode::Single | SearchMode::Auto => {
            (search.stage(Phase::Scan, space.fine_points(), (0.0, 100.0))?, None)
        }
    };

    let metric = objective.metric(&best.result);
    ctx.report(
        Phase::Done,
        100.0,
        format!("best {} with metric {metric:.2}", best.params),
    );
    info!(
        "best {}: cut {:.1}, fill {:.1}, metric {metric:.2} after {} evaluations in {:?}",
        best.params,
        best.result.cut,
        best.result.fill,
        search.evaluated,
        now.elapsed()
    );

    let fallback_triggered = search.stages.iter().any(|s| s.fallback_batches > 0);
    Ok(OptimizationOutcome {
        params: best.params,
        best: best.result,
        objective,
        metric,
        evaluated: search.evaluated,
        failed: search.failures.len(),
        fallback_triggered,
        failures: search.failures,
        coarse_best,
        stages: search.stages,
        full_fine_points: space.fine_point_count(),
        space,
    })
}

struct Search<'a> {
    ctx: &'a ExecutionContext,
    executor: &'a Executor,
    local: WorkerContext,
    objective: Objective,
    stages: Vec<StageSummary>,
    failures: Vec<ScenarioFailure>,
    evaluated: usize,
}

impl Search<'_> {
    /// Evaluates `points` in batches and returns the stage optimum.
    ///
    /// Progress is reported between `from` and `to` percent.
    fn stage(
        &mut self,
        phase: Phase,
        points: Vec<ScenarioParams>,
        (from, to): (f64, f64),
    ) -> Result<Evaluated, EarthworkError> {
        let now = Instant::now();
        let total = points.len();
        let units: Vec<WorkUnit> = points
            .into_iter()
            .enumerate()
            .map(|(index, params)| WorkUnit { index, params })
            .collect();
        let mut summary = StageSummary {
            phase,
            points: total,
            evaluated: 0,
            failed: 0,
            batches: 0,
            fallback_batches: 0,
        };
        let mut best: Option<Evaluated> = None;

        for batch in units.chunks(self.executor.config().batch_size.max(1)) {
            if self.ctx.cancel.is_cancelled() {
                warn!(
                    "{phase:?} stage cancelled after {} of {total} points",
                    summary.evaluated + summary.failed
                );
                return Err(EarthworkError::Cancelled);
            }
            let request = WorkerRequest::new(
                self.ctx.project.clone(),
                self.ctx.grid.clone(),
                self.executor.config().method,
                batch.to_vec(),
            );
            let outcome = self.executor.run_batch(&self.local, &request)?;

            summary.batches += 1;
            summary.evaluated += outcome.evaluated.len();
            summary.failed += outcome.failures.len();
            if outcome.fallback_triggered {
                summary.fallback_batches += 1;
            }
            best = self
                .objective
                .best(best.iter().chain(&outcome.evaluated))
                .cloned();
            self.failures.extend(outcome.failures);

            #[allow(clippy::cast_precision_loss)]
            let done = (summary.evaluated + summary.failed) as f64 / total as f64;
            self.ctx.report(
                phase,
                from + (to - from) * done,
                format!(
                    "{phase:?}: {} of {total} scenarios",
                    summary.evaluated + summary.failed
                ),
            );
        }

        let best = best.ok_or_else(|| {
            EarthworkError::Configuration(format!("{phase:?} stage has no points"))
        })?;
        info!(
            "{phase:?} stage: {} evaluated, {} failed, best {} (metric {:.2}) in {:?}",
            summary.evaluated,
            summary.failed,
            best.params,
            self.objective.metric(&best.result),
            now.elapsed()
        );
        self.evaluated += summary.evaluated;
        self.stages.push(summary);
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::{optimize, optimize_with, OptimizationOutcome, SearchMode};
    use crate::{
        context::{CancelToken, ExecutionContext, Phase, ProgressEvent},
        executor::{
            Backend, Dispatched, Dispatcher, Executor, ExecutorConfig, GridSource,
            ScenarioFailure, WorkerContext, WorkerReply, WorkerRequest,
        },
        project::{
            PlatformConfig, ProjectConfig, RampConfig, SearchSettings, Steps, SurfaceConfig,
        },
        sampler::tests::plane,
        scenario::tests::rect,
        EarthworkError, FailureKind,
    };
    use approx::assert_abs_diff_eq;
    use elevation::GridMode;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tempfile::TempDir;

    fn project(with_ramp: bool) -> ProjectConfig {
        let mut surfaces = vec![SurfaceConfig::Platform(PlatformConfig {
            footprint: rect(10.0, 10.0, 30.0, 30.0),
            batter: None,
        })];
        if with_ramp {
            surfaces.push(SurfaceConfig::Ramp(RampConfig {
                footprint: rect(30.0, 15.0, 50.0, 25.0),
                max_slope_percent: 8.0,
                slope_percent: 0.0,
                optimize_slope: true,
                surfaced: false,
            }));
        }
        ProjectConfig {
            crs: None,
            reference_elevation: None,
            optimize_for_net_earthwork: true,
            external_material_thickness: 0.0,
            surfaces,
            search: SearchSettings {
                height_window: 2.0,
                height_steps: Steps {
                    coarse: 0.5,
                    fine: 0.05,
                },
                slope_steps: Steps {
                    coarse: 2.0,
                    fine: 0.5,
                },
                ..SearchSettings::default()
            },
        }
    }

    fn context(dir: &TempDir, project: &ProjectConfig) -> ExecutionContext {
        let path = dir.path().join("plane.egrid");
        plane(60, 40).save(&path).unwrap();
        ExecutionContext::new(
            project.encode(),
            GridSource {
                path,
                mode: GridMode::MemMap,
            },
        )
        .with_executor(ExecutorConfig {
            workers: 1,
            backend: Backend::Sequential,
            ..ExecutorConfig::default()
        })
    }

    #[test]
    fn test_single_scan_balances_plane() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = optimize(&context(&dir, &project(false))).unwrap();
        assert!(outcome.coarse_best.is_none());
        assert_eq!(outcome.stages.len(), 1);
        assert_eq!(outcome.stages[0].phase, Phase::Scan);
        // On a plane the mean elevation balances cut and fill.
        assert!(outcome.best.net < 20.0);
        assert_eq!(outcome.evaluated, 81);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn test_coarse_to_fine_never_worse_than_coarse() {
        let dir = tempfile::tempdir().unwrap();
        let outcome: OptimizationOutcome = optimize(&context(&dir, &project(true))).unwrap();
        let coarse = outcome.coarse_best.as_ref().unwrap();
        assert!(outcome.metric <= coarse.net + 1e-9);
        assert_eq!(outcome.stages.len(), 2);
        let slope = outcome.params.ramp_slope.unwrap();
        // Terrain rises away from the platform, so the ramp may only rise.
        assert!((0.0..=8.0).contains(&slope));
        assert!(outcome.evaluated < outcome.full_fine_points);
    }

    #[test]
    fn test_forced_single_mode_scans_full_product() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(true);
        project.search.mode = SearchMode::Single;
        let outcome = optimize(&context(&dir, &project)).unwrap();
        assert_eq!(outcome.evaluated, outcome.full_fine_points);
    }

    #[test]
    fn test_inverted_range_fails_before_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(false);
        project.search.height_range = Some((105.0, 100.0));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let ctx = context(&dir, &project)
            .with_progress(move |e: &ProgressEvent| sink.lock().unwrap().push(e.phase));
        assert!(matches!(
            optimize(&ctx),
            Err(EarthworkError::Configuration(_))
        ));
        assert_eq!(*events.lock().unwrap(), vec![Phase::Prepare]);
    }

    #[test]
    fn test_cancelled_before_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = context(&dir, &project(false)).with_cancel(cancel);
        assert!(matches!(optimize(&ctx), Err(EarthworkError::Cancelled)));
    }

    #[test]
    fn test_progress_reaches_done() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::<ProgressEvent>::new()));
        let sink = events.clone();
        let ctx = context(&dir, &project(true))
            .with_progress(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone()));
        optimize(&ctx).unwrap();
        let events = events.lock().unwrap();
        assert_eq!(events.first().unwrap().phase, Phase::Prepare);
        let last = events.last().unwrap();
        assert_eq!(last.phase, Phase::Done);
        assert_abs_diff_eq!(last.percent, 100.0);
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    }

    /// Evaluates in-process but loses every unit whose scan index is a
    /// multiple of `every`.
    struct Lossy {
        every: usize,
    }

    impl Dispatcher for Lossy {
        fn name(&self) -> &str {
            "lossy"
        }

        fn dispatch(
            &self,
            request: &WorkerRequest,
            _timeout: Option<Duration>,
        ) -> Result<Dispatched, EarthworkError> {
            let ctx = WorkerContext::open(request)?;
            let replies = request
                .units
                .iter()
                .map(|unit| {
                    if unit.index % self.every == 0 {
                        WorkerReply::failed(ScenarioFailure::worker(unit, "worker lost"))
                    } else {
                        ctx.run_unit(unit)
                    }
                })
                .collect();
            Ok(Dispatched {
                replies,
                timed_out: false,
            })
        }
    }

    #[test]
    fn test_partial_worker_failures_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, &project(false));
        let executor = Executor::with_dispatcher(ctx.executor.clone(), Box::new(Lossy { every: 4 }));
        let outcome = optimize_with(&ctx, &executor).unwrap();
        // 81 heights, indices 0, 4, .., 80 are lost.
        assert_eq!(outcome.failed, 21);
        assert_eq!(outcome.evaluated, 60);
        assert_eq!(outcome.stages[0].failed, 21);
        assert!(!outcome.fallback_triggered);
        assert!(outcome
            .failures
            .iter()
            .all(|f| f.index % 4 == 0 && f.kind == FailureKind::Worker));
        assert!(outcome
            .failures
            .iter()
            .all(|f| f.params.platform_height != outcome.params.platform_height));
    }
}
