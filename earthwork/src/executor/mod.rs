//! Batch execution.
//!
//! The [Executor] runs a batch of work units either in the caller's
//! process or through a [Dispatcher] (a thread pool or a pool of
//! worker processes), depending on batch size. Per-unit failures are
//! collected, not raised. A parallel batch in which no unit succeeds,
//! or which runs past its timeout, is retried once in-process.

mod process;
mod threads;
mod wire;

pub use self::{
    process::ProcessPool,
    threads::ThreadPool,
    wire::{
        fail_all, serve, GridSource, ScenarioFailure, WorkUnit, WorkerContext, WorkerReply,
        WorkerRequest, WIRE_VERSION,
    },
};
use crate::{
    sampler::SamplingMethod, search::Evaluated, EarthworkError, FailureCause, FailureKind,
};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    path::PathBuf,
    time::{Duration, Instant},
};

/// Batches smaller than this run in-process.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 20;

/// Upper bound on units per dispatched batch.
pub const DEFAULT_BATCH_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Backend {
    /// Always evaluate in the caller's process.
    Sequential,

    /// A rayon pool; every pool task opens its own grid.
    ///
    /// This is the library default. Evaluation shares no mutable state,
    /// so threads give the same results as processes; choose
    /// [Backend::Processes] when a crash in one evaluation must not take
    /// down the caller.
    #[default]
    Threads,

    /// `program worker` child processes speaking the wire protocol
    /// over stdin and stdout.
    Processes { program: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Parallel worker count.
    pub workers: usize,

    /// Minimum batch size dispatched in parallel.
    pub parallel_threshold: usize,

    pub backend: Backend,

    /// Time allowed for one parallel batch.
    pub batch_timeout: Option<Duration>,

    pub method: SamplingMethod,

    /// Maximum number of units per batch. Cancellation and progress
    /// are handled between batches.
    pub batch_size: usize,

    /// Retry failed parallel batches in-process.
    pub sequential_fallback: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            backend: Backend::default(),
            batch_timeout: None,
            method: SamplingMethod::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            sequential_fallback: true,
        }
    }
}

/// Available parallelism less one, and at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Replies gathered from a parallel dispatch.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub replies: Vec<WorkerReply>,

    /// The batch deadline passed before every unit replied.
    pub timed_out: bool,
}

/// Runs a request's units somewhere other than the calling thread.
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluates every unit of `request`.
    ///
    /// Returns `Err` only when dispatch itself fails; evaluation
    /// problems are reported per unit.
    fn dispatch(
        &self,
        request: &WorkerRequest,
        timeout: Option<Duration>,
    ) -> Result<Dispatched, EarthworkError>;
}

/// Results of one batch, in scan order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub evaluated: Vec<Evaluated>,
    pub failures: Vec<ScenarioFailure>,

    /// The batch ran in parallel.
    pub parallel: bool,

    /// The batch was retried in-process.
    pub fallback_triggered: bool,
}

impl BatchOutcome {
    /// Sorts `replies` into results and failures for `request`.
    ///
    /// Replies with a foreign wire version count as worker failures,
    /// and units without any reply fail with `missing`.
    fn collect(request: &WorkerRequest, replies: Vec<WorkerReply>, missing: &str) -> Self {
        let units: HashMap<usize, &WorkUnit> =
            request.units.iter().map(|unit| (unit.index, unit)).collect();
        let mut answered: HashMap<usize, WorkerReply> = HashMap::with_capacity(replies.len());
        for reply in replies {
            if units.contains_key(&reply.index) {
                answered.entry(reply.index).or_insert(reply);
            } else {
                warn!("discarding reply for unknown unit {}", reply.index);
            }
        }

        let mut outcome = Self::default();
        for unit in &request.units {
            match answered.remove(&unit.index) {
                Some(reply) if reply.version != WIRE_VERSION => {
                    outcome.failures.push(ScenarioFailure::worker(
                        unit,
                        format!(
                            "reply wire version {} does not match {WIRE_VERSION}",
                            reply.version
                        ),
                    ));
                }
                Some(WorkerReply {
                    outcome: Ok(result),
                    ..
                }) => outcome.evaluated.push(Evaluated {
                    index: unit.index,
                    params: unit.params,
                    result,
                }),
                Some(WorkerReply {
                    outcome: Err(failure),
                    ..
                }) => outcome.failures.push(failure),
                None => outcome.failures.push(ScenarioFailure::worker(unit, missing)),
            }
        }
        outcome
    }

    fn into_all_failed(mut self, cause: FailureCause) -> EarthworkError {
        let failed = self.failures.len();
        self.failures.sort_by_key(|f| f.index);
        let source = self
            .failures
            .into_iter()
            .next()
            .map_or_else(
                || EarthworkError::Worker("empty batch".into()),
                ScenarioFailure::into_error,
            );
        EarthworkError::AllScenariosFailed {
            failed,
            cause,
            source: Box::new(source),
        }
    }
}

pub struct Executor {
    config: ExecutorConfig,
    dispatcher: Option<Box<dyn Dispatcher>>,
}

impl Executor {
    /// Returns an executor for `config`'s backend.
    pub fn new(config: ExecutorConfig) -> Result<Self, EarthworkError> {
        if config.workers == 0 {
            return Err(EarthworkError::Configuration("worker count must be >= 1".into()));
        }
        if config.batch_size == 0 {
            return Err(EarthworkError::Configuration("batch size must be >= 1".into()));
        }
        let dispatcher: Option<Box<dyn Dispatcher>> = match &config.backend {
            Backend::Sequential => None,
            Backend::Threads => Some(Box::new(ThreadPool::new(config.workers)?)),
            Backend::Processes { program } => {
                Some(Box::new(ProcessPool::new(program.clone(), config.workers)))
            }
        };
        Ok(Self { config, dispatcher })
    }

    /// Returns an executor using a caller-supplied dispatcher.
    pub fn with_dispatcher(config: ExecutorConfig, dispatcher: Box<dyn Dispatcher>) -> Self {
        Self {
            config,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Evaluates every unit of `request`.
    ///
    /// `local` evaluates in-process: small batches, and the retry of a
    /// parallel batch in which nothing succeeded.
    ///
    /// # Errors
    ///
    /// [EarthworkError::AllScenariosFailed] when no unit evaluated
    /// successfully after any retry.
    pub fn run_batch(
        &self,
        local: &WorkerContext,
        request: &WorkerRequest,
    ) -> Result<BatchOutcome, EarthworkError> {
        let n = request.units.len();
        if n == 0 {
            return Ok(BatchOutcome::default());
        }
        let dispatcher = match &self.dispatcher {
            Some(d) if n >= self.config.parallel_threshold => d,
            _ => {
                let outcome = sequential(local, request);
                return if outcome.evaluated.is_empty() {
                    Err(outcome.into_all_failed(FailureCause::Computation))
                } else {
                    Ok(outcome)
                };
            }
        };

        let now = Instant::now();
        let timeout = self.config.batch_timeout;
        let parallel = match dispatcher.dispatch(request, timeout) {
            Ok(Dispatched {
                replies,
                timed_out: false,
            }) => BatchOutcome::collect(request, replies, "worker exited without replying"),
            Ok(Dispatched {
                replies,
                timed_out: true,
            }) => {
                warn!(
                    "{} batch of {n} timed out after {:?} with {} replies",
                    dispatcher.name(),
                    now.elapsed(),
                    replies.len()
                );
                let err = EarthworkError::Timeout(timeout.unwrap_or_default());
                BatchOutcome::collect(request, fail_all(request, &err), "")
            }
            Err(e) => {
                warn!("{} dispatch failed: {e}", dispatcher.name());
                BatchOutcome::collect(request, fail_all(request, &e), "")
            }
        };
        debug!(
            "{} batch of {n}: {} ok, {} failed in {:?}",
            dispatcher.name(),
            parallel.evaluated.len(),
            parallel.failures.len(),
            now.elapsed()
        );

        if !parallel.evaluated.is_empty() {
            for failure in &parallel.failures {
                warn!("scenario {} failed: {}", failure.params, failure.message);
            }
            return Ok(BatchOutcome {
                parallel: true,
                ..parallel
            });
        }

        if !self.config.sequential_fallback {
            let cause = classify(&parallel.failures);
            return Err(parallel.into_all_failed(cause));
        }

        warn!(
            "all {n} units failed in the {} pool, retrying sequentially",
            dispatcher.name()
        );
        let retry = sequential(local, request);
        if retry.evaluated.is_empty() {
            return Err(retry.into_all_failed(FailureCause::Computation));
        }
        info!(
            "sequential retry evaluated {} of {n} units, parallel failure was infrastructure",
            retry.evaluated.len()
        );
        Ok(BatchOutcome {
            parallel: true,
            fallback_triggered: true,
            ..retry
        })
    }
}

fn sequential(local: &WorkerContext, request: &WorkerRequest) -> BatchOutcome {
    BatchOutcome::collect(request, local.run(&request.units), "")
}

/// Guesses where a failure without a retry originated.
fn classify(failures: &[ScenarioFailure]) -> FailureCause {
    if failures
        .iter()
        .all(|f| matches!(f.kind, FailureKind::Worker | FailureKind::Timeout))
    {
        FailureCause::Infrastructure
    } else {
        FailureCause::Computation
    }
}

/// Split `total` items into up to `num_batches` ranges `[start, end)`.
/// Batches are as equal in size as possible; later batches may be smaller.
pub(crate) fn batch_ranges(total: usize, num_batches: usize) -> Vec<(usize, usize)> {
    if total == 0 || num_batches == 0 {
        return Vec::new();
    }
    let num_batches = num_batches.min(total);
    let base = total / num_batches;
    let remainder = total % num_batches;
    let mut ranges = Vec::with_capacity(num_batches);
    let mut start = 0;
    for i in 0..num_batches {
        let size = base + usize::from(i < remainder);
        let end = start + size;
        ranges.push((start, end));
        start = end;
    }
    ranges
}
