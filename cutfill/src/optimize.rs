use crate::{
    options::{BackendArg, Optimize},
    progress::Bar,
    report,
};
use anyhow::Result;
use earthwork::{
    executor::default_workers, optimize, Backend, CancelToken, ExecutionContext, ExecutorConfig,
    GridSource, ProjectSpec,
};
use log::{info, warn};
use std::{
    io::{self, Write},
    time::Duration,
};

impl Optimize {
    pub fn run(&self) -> Result<()> {
        let project = ProjectSpec::load(&self.inputs.project)?;
        let backend = match self.backend {
            BackendArg::Sequential => Backend::Sequential,
            BackendArg::Threads => Backend::Threads,
            BackendArg::Processes => Backend::Processes {
                program: std::env::current_exe()?,
            },
        };
        let executor = ExecutorConfig {
            workers: self.workers.unwrap_or_else(default_workers),
            parallel_threshold: self.threshold,
            backend,
            batch_timeout: self.timeout_secs.map(Duration::from_secs),
            method: self.inputs.method(),
            sequential_fallback: !self.no_fallback,
            ..ExecutorConfig::default()
        };
        info!(
            "optimising {} with {} workers",
            self.inputs.project.display(),
            executor.workers
        );

        let cancel = CancelToken::new();
        {
            let cancel = cancel.clone();
            ctrlc::set_handler(move || {
                warn!("interrupted, stopping after the current batch");
                cancel.cancel();
            })?;
        }

        let bar = Bar::new(self.json);
        let ctx = ExecutionContext::new(
            project,
            GridSource {
                path: self.inputs.grid.clone(),
                mode: self.inputs.grid_mode(),
            },
        )
        .with_executor(executor)
        .with_cancel(cancel)
        .with_progress(bar.clone());
        let outcome = optimize(&ctx);
        bar.finish();
        let outcome = outcome?;

        let mut out = io::stdout().lock();
        if self.json {
            serde_json::to_writer_pretty(&mut out, &outcome)?;
            writeln!(out)?;
        } else {
            report::outcome(&mut out, &outcome)?;
        }
        Ok(())
    }
}
