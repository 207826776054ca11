use earthwork::{scenario::SurfaceKind, OptimizationOutcome, ScenarioResult};
use std::io::{Result, Write};

fn label(kind: SurfaceKind) -> &'static str {
    match kind {
        SurfaceKind::Platform => "platform",
        SurfaceKind::Foundation => "foundation",
        SurfaceKind::Ramp => "ramp",
        SurfaceKind::StorageArea => "storage",
    }
}

pub fn scenario(out: &mut impl Write, result: &ScenarioResult) -> Result<()> {
    writeln!(out, "scenario  {}", result.params())?;
    writeln!(
        out,
        "{:<12}{:>12}{:>12}{:>12}{:>12}{:>10}",
        "surface", "cut", "fill", "batter cut", "batter fill", "cells"
    )?;
    for surface in &result.surfaces {
        writeln!(
            out,
            "{:<12}{:>12.2}{:>12.2}{:>12.2}{:>12.2}{:>10}",
            label(surface.kind),
            surface.cut,
            surface.fill,
            surface.batter_cut,
            surface.batter_fill,
            surface.sample_count
        )?;
    }
    writeln!(out, "cut       {:>12.2} m3", result.cut)?;
    writeln!(out, "fill      {:>12.2} m3", result.fill)?;
    writeln!(out, "net       {:>12.2} m3", result.net)?;
    writeln!(out, "total     {:>12.2} m3", result.total)?;
    writeln!(out, "external  {:>12.2} m3", result.external_volume)
}

pub fn outcome(out: &mut impl Write, outcome: &OptimizationOutcome) -> Result<()> {
    scenario(out, &outcome.best)?;
    writeln!(out)?;
    writeln!(out, "objective {:?} = {:.2}", outcome.objective, outcome.metric)?;
    for stage in &outcome.stages {
        writeln!(
            out,
            "{:<8} {:>7} points {:>7} evaluated {:>5} failed {:>4} batches {:>3} fallback",
            format!("{:?}", stage.phase),
            stage.points,
            stage.evaluated,
            stage.failed,
            stage.batches,
            stage.fallback_batches
        )?;
    }
    writeln!(
        out,
        "evaluated {} of {} fine points, {} failed{}",
        outcome.evaluated,
        outcome.full_fine_points,
        outcome.failed,
        if outcome.fallback_triggered {
            ", sequential fallback used"
        } else {
            ""
        }
    )
}
