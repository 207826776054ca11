use crate::{options::Evaluate, report};
use anyhow::Result;
use earthwork::{Evaluator, ProjectSpec, ScenarioParams};
use elevation::ElevationGrid;
use std::io::{self, Write};

impl Evaluate {
    pub fn run(&self) -> Result<()> {
        let project = ProjectSpec::load(&self.inputs.project)?.decode()?;
        let grid = ElevationGrid::open(&self.inputs.grid, self.inputs.grid_mode())?;
        let evaluator = Evaluator::prepare(&project, &grid, self.inputs.method())?;

        let params = ScenarioParams {
            platform_height: self.height,
            ramp_slope: evaluator
                .ramp()
                .map(|ramp| self.slope.unwrap_or(ramp.slope_percent)),
            storage_offset: evaluator
                .storage()
                .map(|storage| self.offset.unwrap_or(storage.offset)),
        };
        let result = evaluator.evaluate(&params)?;

        let mut out = io::stdout().lock();
        if self.json {
            serde_json::to_writer_pretty(&mut out, &result)?;
            writeln!(out)?;
        } else {
            report::scenario(&mut out, &result)?;
        }
        Ok(())
    }
}
