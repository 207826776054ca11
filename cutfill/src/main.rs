use anyhow::Result;
use clap::Parser;
use options::Cli;

mod convert;
mod evaluate;
mod optimize;
mod options;
mod progress;
mod report;
mod worker;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli {
        Cli::Optimize(optimize) => optimize.run(),
        Cli::Evaluate(evaluate) => evaluate.run(),
        Cli::Convert(convert) => convert.run(),
        Cli::Worker(worker) => worker.run(),
    }
}
