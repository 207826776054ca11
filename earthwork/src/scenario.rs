//! Scenario evaluation.
//!
//! An [Evaluator] samples every surface of a project once. Evaluating
//! a [ScenarioParams] point afterwards only walks the prepared samples,
//! so a worker can evaluate thousands of points against one
//! preparation.

use crate::{
    math::least_squares_slope,
    project::{Batter, ProjectConfig, SurfaceConfig},
    sampler::{sample, sample_ring, RingSamples, Samples, SamplingMethod},
    volume::{batter_cut_fill, cut_fill_with, external_volume, CutFill, FillPolicy},
    EarthworkError,
};
use elevation::ElevationGrid;
use geo::{
    geometry::{Point, Polygon},
    Area, EuclideanDistance,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terrain gradients within `±DEADBAND` (m/m) leave the ramp free to
/// slope either way.
pub const DEADBAND: f64 = 0.005;

/// Slack allowed when checking a parameter against its bounds.
const BOUND_EPS: f64 = 1e-9;

/// One point in the search space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub platform_height: f64,

    /// Ramp grade in percent. `None` uses the configured slope.
    #[serde(default)]
    pub ramp_slope: Option<f64>,

    /// Storage area offset from the platform. `None` uses the
    /// configured offset.
    #[serde(default)]
    pub storage_offset: Option<f64>,
}

impl ScenarioParams {
    pub fn at_height(platform_height: f64) -> Self {
        Self {
            platform_height,
            ramp_slope: None,
            storage_offset: None,
        }
    }
}

impl fmt::Display for ScenarioParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h={:.3}", self.platform_height)?;
        if let Some(slope) = self.ramp_slope {
            write!(f, " slope={slope:.2}%")?;
        }
        if let Some(offset) = self.storage_offset {
            write!(f, " offset={offset:.3}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Platform,
    Foundation,
    Ramp,
    StorageArea,
}

/// Volumes moved for one surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceVolumes {
    pub kind: SurfaceKind,
    pub cut: f64,
    pub fill: f64,
    pub batter_cut: f64,
    pub batter_fill: f64,
    pub footprint_area: f64,
    pub sample_count: usize,
}

/// Outcome of one scenario.
///
/// `cut` and `fill` include batter volumes. `external_volume` is
/// never part of `net` or `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub platform_height: f64,

    /// Ramp grade actually used, if the project has a ramp.
    pub ramp_slope: Option<f64>,

    /// Storage offset actually used, if the project has a storage
    /// area.
    pub storage_offset: Option<f64>,

    pub cut: f64,
    pub fill: f64,
    pub net: f64,
    pub total: f64,
    pub external_volume: f64,
    pub surfaces: Vec<SurfaceVolumes>,
}

impl ScenarioResult {
    /// Parameters that reproduce this result.
    pub fn params(&self) -> ScenarioParams {
        ScenarioParams {
            platform_height: self.platform_height,
            ramp_slope: self.ramp_slope,
            storage_offset: self.storage_offset,
        }
    }
}

/// Returns the allowed ramp grade range (percent) for a terrain
/// `gradient` (m/m) measured away from the platform.
pub fn slope_bounds(gradient: f64, max_slope_percent: f64) -> (f64, f64) {
    if gradient > DEADBAND {
        (0.0, max_slope_percent)
    } else if gradient < -DEADBAND {
        (-max_slope_percent, 0.0)
    } else {
        (-max_slope_percent, max_slope_percent)
    }
}

/// Evaluates `params` against `project` and `grid` in one step.
pub fn evaluate(
    params: &ScenarioParams,
    project: &ProjectConfig,
    grid: &ElevationGrid,
) -> Result<ScenarioResult, EarthworkError> {
    Evaluator::prepare(project, grid, SamplingMethod::default())?.evaluate(params)
}

/// How a surface's target elevation follows the platform height.
#[derive(Debug, Clone)]
enum Target {
    Platform,
    Foundation { depth: f64 },

    /// Per-sample distance from the platform footprint.
    Ramp { distances: Vec<f64> },

    Storage,
}

#[derive(Debug, Clone)]
struct PreparedSurface {
    kind: SurfaceKind,
    target: Target,
    samples: Samples,
    policy: FillPolicy,
    batter: Option<(RingSamples, f64)>,
    footprint_area: f64,
}

impl PreparedSurface {
    fn volumes(&self, height: f64, slope: f64, offset: f64) -> SurfaceVolumes {
        let level = match &self.target {
            Target::Platform | Target::Ramp { .. } => height,
            Target::Foundation { depth } => height - depth,
            Target::Storage => height + offset,
        };
        let body = match &self.target {
            Target::Ramp { distances } => cut_fill_with(
                &self.samples,
                |idx| level + slope / 100.0 * distances[idx],
                &self.policy,
            ),
            _ => cut_fill_with(&self.samples, |_| level, &self.policy),
        };
        let batter = self
            .batter
            .as_ref()
            .map(|(ring, slope_deg)| batter_cut_fill(ring, level, *slope_deg))
            .unwrap_or_default();
        SurfaceVolumes {
            kind: self.kind,
            cut: body.cut,
            fill: body.fill,
            batter_cut: batter.cut,
            batter_fill: batter.fill,
            footprint_area: self.footprint_area,
            sample_count: self.samples.len(),
        }
    }
}

/// Ramp properties derived from terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampInfo {
    pub max_slope_percent: f64,
    pub slope_percent: f64,
    pub optimize_slope: bool,

    /// Least-squares terrain gradient (m/m) away from the platform.
    pub gradient: f64,

    /// Grade range the search may explore.
    pub bounds: (f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageInfo {
    pub offset: f64,
    pub offset_range: Option<(f64, f64)>,
    pub optimize_offset: bool,
}

/// Project surfaces sampled against one grid.
#[derive(Debug, Clone)]
pub struct Evaluator {
    surfaces: Vec<PreparedSurface>,
    external_volume: f64,
    platform_mean: f64,
    ramp: Option<RampInfo>,
    storage: Option<StorageInfo>,
}

impl Evaluator {
    /// Validates `project` and samples all of its surfaces.
    pub fn prepare(
        project: &ProjectConfig,
        grid: &ElevationGrid,
        method: SamplingMethod,
    ) -> Result<Self, EarthworkError> {
        project.validate(Some(grid))?;
        let platform = project
            .platform()
            .ok_or_else(|| EarthworkError::Configuration("project has no platform".into()))?;
        let footprints: Vec<&Polygon<f64>> =
            project.surfaces.iter().map(SurfaceConfig::footprint).collect();
        let thickness = project.external_material_thickness;

        let mut surfaces = Vec::with_capacity(project.surfaces.len());
        let mut external = 0.0;
        let mut platform_mean = None;
        let mut ramp = None;
        let mut storage = None;

        for surface in &project.surfaces {
            let footprint = surface.footprint();
            let samples = sample(grid, footprint, method)?;
            let footprint_area = footprint.unsigned_area();
            let others: Vec<&Polygon<f64>> = footprints
                .iter()
                .copied()
                .filter(|other| !std::ptr::eq(*other, footprint))
                .collect();
            let ring = |batter: Option<Batter>| {
                batter.map(|b| (sample_ring(grid, footprint, b.width, &others), b.slope_deg))
            };

            let prepared = match surface {
                SurfaceConfig::Platform(p) => {
                    external += external_volume(footprint_area, thickness);
                    platform_mean = samples.mean();
                    PreparedSurface {
                        kind: SurfaceKind::Platform,
                        target: Target::Platform,
                        batter: ring(p.batter),
                        policy: FillPolicy::Full,
                        samples,
                        footprint_area,
                    }
                }
                SurfaceConfig::Foundation(f) => PreparedSurface {
                    kind: SurfaceKind::Foundation,
                    target: Target::Foundation { depth: f.depth },
                    batter: None,
                    policy: FillPolicy::Full,
                    samples,
                    footprint_area,
                },
                SurfaceConfig::Ramp(r) => {
                    if r.surfaced {
                        external += external_volume(footprint_area, thickness);
                    }
                    let distances: Vec<f64> = samples
                        .points
                        .iter()
                        .map(|p| Point::from(*p).euclidean_distance(&platform.footprint))
                        .collect();
                    let gradient = least_squares_slope(&distances, &samples.values);
                    let bounds = slope_bounds(gradient, r.max_slope_percent);
                    debug!(
                        "ramp gradient {:.4} over {} samples, slope bounds {bounds:?}",
                        gradient,
                        samples.len()
                    );
                    ramp = Some(RampInfo {
                        max_slope_percent: r.max_slope_percent,
                        slope_percent: r.slope_percent,
                        optimize_slope: r.optimize_slope,
                        gradient,
                        bounds,
                    });
                    PreparedSurface {
                        kind: SurfaceKind::Ramp,
                        target: Target::Ramp { distances },
                        batter: None,
                        policy: FillPolicy::Full,
                        samples,
                        footprint_area,
                    }
                }
                SurfaceConfig::StorageArea(s) => {
                    if s.surfaced {
                        external += external_volume(footprint_area, thickness);
                    }
                    storage = Some(StorageInfo {
                        offset: s.offset,
                        offset_range: s.offset_range,
                        optimize_offset: s.optimize_offset,
                    });
                    PreparedSurface {
                        kind: SurfaceKind::StorageArea,
                        target: Target::Storage,
                        batter: ring(s.batter),
                        policy: FillPolicy::from_supports(&samples.points, &s.support_points),
                        samples,
                        footprint_area,
                    }
                }
            };
            surfaces.push(prepared);
        }

        let platform_mean = platform_mean
            .ok_or_else(|| EarthworkError::Sampling("no samples under platform".into()))?;
        Ok(Self {
            surfaces,
            external_volume: external,
            platform_mean,
            ramp,
            storage,
        })
    }

    /// Mean terrain elevation under the platform.
    pub fn platform_mean(&self) -> f64 {
        self.platform_mean
    }

    pub fn ramp(&self) -> Option<&RampInfo> {
        self.ramp.as_ref()
    }

    pub fn storage(&self) -> Option<&StorageInfo> {
        self.storage.as_ref()
    }

    /// External material volume, identical for every scenario.
    pub fn external_volume(&self) -> f64 {
        self.external_volume
    }

    /// Evaluates one parameter point.
    pub fn evaluate(&self, params: &ScenarioParams) -> Result<ScenarioResult, EarthworkError> {
        let height = params.platform_height;
        if !height.is_finite() {
            return Err(EarthworkError::InvalidScenario(format!(
                "platform height {height} is not finite"
            )));
        }
        let ramp_slope = self
            .ramp
            .map(|ramp| {
                let slope = params.ramp_slope.unwrap_or(ramp.slope_percent);
                if slope.is_finite() && slope.abs() <= ramp.max_slope_percent + BOUND_EPS {
                    Ok(slope)
                } else {
                    Err(EarthworkError::InvalidScenario(format!(
                        "ramp slope {slope}% outside ±{}%",
                        ramp.max_slope_percent
                    )))
                }
            })
            .transpose()?;
        let storage_offset = self
            .storage
            .map(|storage| {
                let offset = params.storage_offset.unwrap_or(storage.offset);
                match storage.offset_range {
                    _ if !offset.is_finite() => Err(EarthworkError::InvalidScenario(format!(
                        "storage offset {offset} is not finite"
                    ))),
                    Some((lo, hi)) if offset < lo - BOUND_EPS || offset > hi + BOUND_EPS => {
                        Err(EarthworkError::InvalidScenario(format!(
                            "storage offset {offset} outside [{lo}, {hi}]"
                        )))
                    }
                    _ => Ok(offset),
                }
            })
            .transpose()?;

        let surfaces: Vec<SurfaceVolumes> = self
            .surfaces
            .iter()
            .map(|s| s.volumes(height, ramp_slope.unwrap_or(0.0), storage_offset.unwrap_or(0.0)))
            .collect();
        let totals = surfaces.iter().fold(CutFill::default(), |acc, s| {
            acc + CutFill {
                cut: s.cut + s.batter_cut,
                fill: s.fill + s.batter_fill,
            }
        });

        Ok(ScenarioResult {
            platform_height: height,
            ramp_slope,
            storage_offset,
            cut: totals.cut,
            fill: totals.fill,
            net: totals.net(),
            total: totals.total(),
            external_volume: self.external_volume,
            surfaces,
        })
    }
}
