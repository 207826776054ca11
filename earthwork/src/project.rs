//! Project configuration.
//!
//! A project is generic over its geometry representation. The
//! serializable [ProjectSpec] carries footprints as WKT strings and
//! is what configuration files and worker requests contain;
//! [ProjectConfig] carries decoded polygons.

use crate::{search::SearchMode, EarthworkError};
use elevation::ElevationGrid;
use geo::{geometry::Polygon, Area};
use serde::{Deserialize, Serialize};
use std::path::Path;
use wkt::{ToWkt, TryFromWkt};

/// Coordinate references whose units are degrees.
pub const GEOGRAPHIC_CRS: &[&str] = &["EPSG:4326", "EPSG:4258", "EPSG:4269", "OGC:CRS84"];

/// Project as read from disk or sent to a worker.
pub type ProjectSpec = ProjectConfig<String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig<G = Polygon<f64>> {
    /// Coordinate reference of all footprints, e.g. `EPSG:25832`.
    #[serde(default)]
    pub crs: Option<String>,

    /// Centre of the default platform height search range.
    #[serde(default)]
    pub reference_elevation: Option<f64>,

    /// Minimise `|cut - fill|` when `true`, `cut + fill` otherwise.
    #[serde(default = "default_true")]
    pub optimize_for_net_earthwork: bool,

    /// Thickness of imported surfacing material (e.g. gravel).
    #[serde(default)]
    pub external_material_thickness: f64,

    pub surfaces: Vec<SurfaceConfig<G>>,

    #[serde(default)]
    pub search: SearchSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceConfig<G = Polygon<f64>> {
    Platform(PlatformConfig<G>),
    Foundation(FoundationConfig<G>),
    Ramp(RampConfig<G>),
    StorageArea(StorageConfig<G>),
}

/// Crane pad. Its elevation is the primary search parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig<G = Polygon<f64>> {
    pub footprint: G,
    #[serde(default)]
    pub batter: Option<Batter>,
}

/// Excavation whose bottom sits `depth` below the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationConfig<G = Polygon<f64>> {
    pub footprint: G,
    pub depth: f64,
}

/// Access ramp inclined away from the platform edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampConfig<G = Polygon<f64>> {
    pub footprint: G,

    /// Steepest allowed grade in percent.
    pub max_slope_percent: f64,

    /// Grade used when the slope is not optimised. Positive grades
    /// rise away from the platform.
    #[serde(default)]
    pub slope_percent: f64,

    #[serde(default)]
    pub optimize_slope: bool,

    /// Include the ramp in the external-material volume.
    #[serde(default)]
    pub surfaced: bool,
}

/// Equipment storage area, level at a vertical offset from the
/// platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig<G = Polygon<f64>> {
    pub footprint: G,

    /// Offset used when the offset is not optimised.
    #[serde(default)]
    pub offset: f64,

    /// Allowed offsets `[min, max]`. Required when optimising.
    #[serde(default)]
    pub offset_range: Option<(f64, f64)>,

    #[serde(default)]
    pub optimize_offset: bool,

    /// Support-point polygons. When present, fill is only placed
    /// under them.
    #[serde(default = "Vec::new")]
    pub support_points: Vec<G>,

    #[serde(default)]
    pub batter: Option<Batter>,

    /// Include the storage area in the external-material volume.
    #[serde(default)]
    pub surfaced: bool,
}

/// Sloped transition between a level surface edge and the terrain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Batter {
    /// Slope angle from horizontal, in degrees.
    pub slope_deg: f64,

    /// Horizontal extent of the batter zone.
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Steps {
    pub coarse: f64,
    pub fine: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Explicit absolute height range `[min, max]`.
    pub height_range: Option<(f64, f64)>,

    /// Half width of the default height range.
    pub height_window: f64,

    pub height_steps: Steps,
    pub slope_steps: Steps,
    pub offset_steps: Steps,
    pub mode: SearchMode,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            height_range: None,
            height_window: 5.0,
            height_steps: Steps {
                coarse: 0.5,
                fine: 0.05,
            },
            slope_steps: Steps {
                coarse: 1.0,
                fine: 0.1,
            },
            offset_steps: Steps {
                coarse: 0.25,
                fine: 0.05,
            },
            mode: SearchMode::Auto,
        }
    }
}

fn default_true() -> bool {
    true
}

impl<G> SurfaceConfig<G> {
    pub fn footprint(&self) -> &G {
        match self {
            Self::Platform(s) => &s.footprint,
            Self::Foundation(s) => &s.footprint,
            Self::Ramp(s) => &s.footprint,
            Self::StorageArea(s) => &s.footprint,
        }
    }

    fn try_map<H, E>(&self, f: &mut impl FnMut(&G) -> Result<H, E>) -> Result<SurfaceConfig<H>, E> {
        Ok(match self {
            Self::Platform(s) => SurfaceConfig::Platform(PlatformConfig {
                footprint: f(&s.footprint)?,
                batter: s.batter,
            }),
            Self::Foundation(s) => SurfaceConfig::Foundation(FoundationConfig {
                footprint: f(&s.footprint)?,
                depth: s.depth,
            }),
            Self::Ramp(s) => SurfaceConfig::Ramp(RampConfig {
                footprint: f(&s.footprint)?,
                max_slope_percent: s.max_slope_percent,
                slope_percent: s.slope_percent,
                optimize_slope: s.optimize_slope,
                surfaced: s.surfaced,
            }),
            Self::StorageArea(s) => SurfaceConfig::StorageArea(StorageConfig {
                footprint: f(&s.footprint)?,
                offset: s.offset,
                offset_range: s.offset_range,
                optimize_offset: s.optimize_offset,
                support_points: s
                    .support_points
                    .iter()
                    .map(&mut *f)
                    .collect::<Result<_, E>>()?,
                batter: s.batter,
                surfaced: s.surfaced,
            }),
        })
    }
}

impl<G> ProjectConfig<G> {
    /// Returns a copy of this project with every geometry converted by
    /// `f`.
    pub fn try_map_geometry<H, E>(
        &self,
        mut f: impl FnMut(&G) -> Result<H, E>,
    ) -> Result<ProjectConfig<H>, E> {
        Ok(ProjectConfig {
            crs: self.crs.clone(),
            reference_elevation: self.reference_elevation,
            optimize_for_net_earthwork: self.optimize_for_net_earthwork,
            external_material_thickness: self.external_material_thickness,
            surfaces: self
                .surfaces
                .iter()
                .map(|s| s.try_map(&mut f))
                .collect::<Result<_, E>>()?,
            search: self.search.clone(),
        })
    }

    pub fn platform(&self) -> Option<&PlatformConfig<G>> {
        self.surfaces.iter().find_map(|s| match s {
            SurfaceConfig::Platform(p) => Some(p),
            _ => None,
        })
    }

    pub fn ramp(&self) -> Option<&RampConfig<G>> {
        self.surfaces.iter().find_map(|s| match s {
            SurfaceConfig::Ramp(r) => Some(r),
            _ => None,
        })
    }

    pub fn storage(&self) -> Option<&StorageConfig<G>> {
        self.surfaces.iter().find_map(|s| match s {
            SurfaceConfig::StorageArea(s) => Some(s),
            _ => None,
        })
    }
}

impl ProjectSpec {
    /// Reads a project spec from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EarthworkError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Decodes WKT footprints into polygons.
    pub fn decode(&self) -> Result<ProjectConfig, EarthworkError> {
        self.try_map_geometry(|wkt| parse_polygon(wkt))
    }
}

impl ProjectConfig {
    /// Encodes polygons as WKT.
    pub fn encode(&self) -> ProjectSpec {
        self.try_map_geometry(|polygon| Ok::<_, std::convert::Infallible>(polygon.to_wkt().to_string()))
            .unwrap_or_else(|never| match never {})
    }

    /// Checks structural constraints and, when a grid is given, its
    /// coordinate reference.
    pub fn validate(&self, grid: Option<&ElevationGrid>) -> Result<(), EarthworkError> {
        let count = |pred: fn(&SurfaceConfig) -> bool| self.surfaces.iter().filter(|s| pred(s)).count();
        match count(|s| matches!(s, SurfaceConfig::Platform(_))) {
            1 => (),
            n => return Err(config_err(format!("expected exactly one platform, found {n}"))),
        }
        if count(|s| matches!(s, SurfaceConfig::Ramp(_))) > 1 {
            return Err(config_err("at most one ramp is supported"));
        }
        if count(|s| matches!(s, SurfaceConfig::StorageArea(_))) > 1 {
            return Err(config_err("at most one storage area is supported"));
        }
        if !(self.external_material_thickness.is_finite() && self.external_material_thickness >= 0.0) {
            return Err(config_err("external material thickness must be >= 0"));
        }
        if let Some(reference) = self.reference_elevation {
            if !reference.is_finite() {
                return Err(config_err("reference elevation must be finite"));
            }
        }

        for surface in &self.surfaces {
            check_footprint(surface.footprint(), "footprint")?;
            match surface {
                SurfaceConfig::Platform(p) => check_batter(p.batter)?,
                SurfaceConfig::Foundation(f) => {
                    if !(f.depth.is_finite() && f.depth >= 0.0) {
                        return Err(config_err("foundation depth must be >= 0"));
                    }
                }
                SurfaceConfig::Ramp(r) => {
                    if !(r.max_slope_percent.is_finite() && r.max_slope_percent > 0.0) {
                        return Err(config_err("ramp max slope must be positive"));
                    }
                    if !r.optimize_slope && r.slope_percent.abs() > r.max_slope_percent {
                        return Err(config_err(format!(
                            "ramp slope {}% exceeds maximum {}%",
                            r.slope_percent, r.max_slope_percent
                        )));
                    }
                }
                SurfaceConfig::StorageArea(s) => {
                    check_batter(s.batter)?;
                    for support in &s.support_points {
                        check_footprint(support, "support point polygon")?;
                    }
                    match s.offset_range {
                        Some((lo, hi)) if !(lo.is_finite() && hi.is_finite() && lo <= hi) => {
                            return Err(config_err(format!("invalid storage offset range [{lo}, {hi}]")));
                        }
                        Some((lo, hi)) if !s.optimize_offset && !(lo..=hi).contains(&s.offset) => {
                            return Err(config_err(format!(
                                "storage offset {} outside [{lo}, {hi}]",
                                s.offset
                            )));
                        }
                        None if s.optimize_offset => {
                            return Err(config_err("optimize_offset requires offset_range"));
                        }
                        _ => (),
                    }
                }
            }
        }

        check_crs(self.crs.as_deref(), grid.and_then(ElevationGrid::crs))
    }
}

fn config_err(msg: impl Into<String>) -> EarthworkError {
    EarthworkError::Configuration(msg.into())
}

fn parse_polygon(wkt: &str) -> Result<Polygon<f64>, EarthworkError> {
    Polygon::<f64>::try_from_wkt_str(wkt)
        .map_err(|e| config_err(format!("invalid footprint WKT '{wkt}': {e}")))
}

fn check_footprint(polygon: &Polygon<f64>, what: &str) -> Result<(), EarthworkError> {
    let area = polygon.unsigned_area();
    if area.is_finite() && area > 0.0 {
        Ok(())
    } else {
        Err(config_err(format!("{what} has zero area")))
    }
}

fn check_batter(batter: Option<Batter>) -> Result<(), EarthworkError> {
    match batter {
        Some(Batter { slope_deg, width })
            if !(slope_deg > 0.0 && slope_deg < 90.0 && width.is_finite() && width >= 0.0) =>
        {
            Err(config_err(format!(
                "batter slope must be in (0, 90) degrees and width >= 0, got {slope_deg} / {width}"
            )))
        }
        _ => Ok(()),
    }
}

fn check_crs(project: Option<&str>, grid: Option<&str>) -> Result<(), EarthworkError> {
    let is_geographic = |crs: &str| GEOGRAPHIC_CRS.iter().any(|g| g.eq_ignore_ascii_case(crs));
    for crs in [project, grid].into_iter().flatten() {
        if is_geographic(crs) {
            return Err(config_err(format!(
                "{crs} is not a projected coordinate reference"
            )));
        }
    }
    match (project, grid) {
        (Some(p), Some(g)) if !p.eq_ignore_ascii_case(g) => Err(config_err(format!(
            "project coordinate reference {p} does not match grid {g}"
        ))),
        _ => Ok(()),
    }
}
