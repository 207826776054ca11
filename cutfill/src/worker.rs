use crate::options::Worker;
use anyhow::Result;
use log::debug;
use std::io;

impl Worker {
    pub fn run(&self) -> Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let answered = earthwork::executor::serve(stdin.lock(), stdout.lock())?;
        debug!("answered {answered} units");
        Ok(())
    }
}
