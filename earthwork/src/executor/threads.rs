//! Rayon thread pool dispatch.

use super::{batch_ranges, fail_all, Dispatched, Dispatcher, WorkerContext, WorkerRequest};
use crate::EarthworkError;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, error};
use rayon::ThreadPoolBuilder;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Splits a request into one chunk per thread. Every chunk decodes the
/// project and opens the grid on its own, exactly as a worker process
/// would.
pub struct ThreadPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl ThreadPool {
    pub fn new(workers: usize) -> Result<Self, EarthworkError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("earthwork-{idx}"))
            .panic_handler(|panic| {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!("pool task panicked: {msg}");
            })
            .build()
            .map_err(|e| EarthworkError::Worker(format!("cannot build thread pool: {e}")))?;
        Ok(Self { pool, workers })
    }
}

impl Dispatcher for ThreadPool {
    fn name(&self) -> &str {
        "thread"
    }

    fn dispatch(
        &self,
        request: &WorkerRequest,
        timeout: Option<Duration>,
    ) -> Result<Dispatched, EarthworkError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let (tx, rx) = crossbeam_channel::unbounded();
        let chunks = batch_ranges(request.units.len(), self.workers);
        for &(start, end) in &chunks {
            let chunk = Arc::new(request.with_units(request.units[start..end].to_vec()));
            let tx = tx.clone();
            self.pool.spawn(move || {
                let replies = match WorkerContext::open(&chunk) {
                    Ok(ctx) => ctx.run(&chunk.units),
                    Err(e) => fail_all(&chunk, &e),
                };
                // The receiver is gone once the batch timed out.
                let _ = tx.send(replies);
            });
        }
        drop(tx);

        let mut dispatched = Dispatched::default();
        let mut pending = chunks.len();
        while pending > 0 {
            let received = match deadline {
                Some(deadline) => rx.recv_deadline(deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(replies) => {
                    dispatched.replies.extend(replies);
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    debug!("abandoning {pending} of {} chunks", chunks.len());
                    dispatched.timed_out = true;
                    break;
                }
                // A chunk panicked outside evaluation.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(dispatched)
    }
}
