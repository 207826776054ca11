use crate::options::Convert;
use anyhow::Result;
use elevation::{ElevationGrid, GridMode};
use log::info;

impl Convert {
    pub fn run(&self) -> Result<()> {
        let grid = ElevationGrid::open(&self.input, GridMode::InMem)?;
        let (cols, rows) = grid.dimensions();
        grid.save(&self.output)?;
        info!(
            "wrote {cols}x{rows} grid to {}",
            self.output.display()
        );
        Ok(())
    }
}
