//! Caller-owned state threaded through an optimisation run.

use crate::{
    executor::{ExecutorConfig, GridSource},
    project::ProjectSpec,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag shared between the caller and a
/// running search.
///
/// The search checks the flag before every batch. Units already
/// dispatched run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    Coarse,
    Fine,
    Scan,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,

    /// Overall completion in `[0, 100]`.
    pub percent: f64,

    pub message: String,
}

/// Receives progress events from a running search.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event);
    }
}

/// Forwards progress events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: &ProgressEvent) {
        debug!(
            "[{:?} {:5.1}%] {}",
            event.phase, event.percent, event.message
        );
    }
}

/// Everything one optimisation run needs.
///
/// Only plain data lives here: the project as WKT, and the grid as a
/// path. Each executor backend reconstructs evaluators from it.
#[derive(Clone)]
pub struct ExecutionContext {
    pub project: ProjectSpec,
    pub grid: GridSource,
    pub executor: ExecutorConfig,
    pub cancel: CancelToken,
    pub progress: Arc<dyn ProgressSink>,
}

impl ExecutionContext {
    pub fn new(project: ProjectSpec, grid: GridSource) -> Self {
        Self {
            project,
            grid,
            executor: ExecutorConfig::default(),
            cancel: CancelToken::new(),
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress<P: ProgressSink + 'static>(mut self, progress: P) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    pub(crate) fn report(&self, phase: Phase, percent: f64, message: impl Into<String>) {
        self.progress.report(&ProgressEvent {
            phase,
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        });
    }
}
