use crate::{
    math::discretize,
    project::{SearchSettings, Steps},
    scenario::{Evaluator, ScenarioParams},
    EarthworkError,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Platform elevation.
    Height,

    /// Ramp grade in percent.
    Slope,

    /// Storage area offset from the platform.
    Offset,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Height => f.write_str("height"),
            Self::Slope => f.write_str("slope"),
            Self::Offset => f.write_str("offset"),
        }
    }
}

/// One searched parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub axis: Axis,
    pub min: f64,
    pub max: f64,
    pub coarse_step: f64,
    pub fine_step: f64,
}

impl Dimension {
    pub fn new(axis: Axis, (min, max): (f64, f64), steps: Steps) -> Result<Self, EarthworkError> {
        let dim = Self {
            axis,
            min,
            max,
            coarse_step: steps.coarse,
            fine_step: steps.fine,
        };
        dim.validate()?;
        Ok(dim)
    }

    fn validate(&self) -> Result<(), EarthworkError> {
        let Self {
            axis,
            min,
            max,
            coarse_step,
            fine_step,
        } = *self;
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(EarthworkError::Configuration(format!(
                "{axis} range [{min}, {max}] is empty or inverted"
            )));
        }
        for step in [coarse_step, fine_step] {
            if !(step.is_finite() && step > 0.0) {
                return Err(EarthworkError::Configuration(format!(
                    "{axis} step {step} must be positive"
                )));
            }
        }
        Ok(())
    }

    pub fn coarse_values(&self) -> Vec<f64> {
        discretize(self.min, self.max, self.coarse_step)
    }

    pub fn fine_values(&self) -> Vec<f64> {
        discretize(self.min, self.max, self.fine_step)
    }

    /// Returns fine values within one coarse step of `center`, clamped
    /// to this dimension's bounds. `center` itself is always included.
    pub fn refine(&self, center: f64) -> Vec<f64> {
        let lo = (center - self.coarse_step).max(self.min);
        let hi = (center + self.coarse_step).min(self.max);
        let mut values = discretize(lo, hi, self.fine_step);
        if !values.iter().any(|v| (v - center).abs() <= 1e-9) {
            values.push(center);
            values.sort_by(f64::total_cmp);
        }
        values
    }
}

/// Enabled search dimensions, height first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    dims: Vec<Dimension>,
}

impl SearchSpace {
    /// Derives the search space from project settings and the
    /// terrain-dependent bounds found by `evaluator`.
    pub fn new(
        settings: &SearchSettings,
        reference_elevation: Option<f64>,
        evaluator: &Evaluator,
    ) -> Result<Self, EarthworkError> {
        let height_range = match settings.height_range {
            Some(range) => range,
            None => {
                let reference = reference_elevation.unwrap_or_else(|| evaluator.platform_mean());
                if !(settings.height_window.is_finite() && settings.height_window >= 0.0) {
                    return Err(EarthworkError::Configuration(format!(
                        "height window {} must be >= 0",
                        settings.height_window
                    )));
                }
                (
                    reference - settings.height_window,
                    reference + settings.height_window,
                )
            }
        };
        let mut dims = vec![Dimension::new(
            Axis::Height,
            height_range,
            settings.height_steps,
        )?];
        if let Some(ramp) = evaluator.ramp().filter(|r| r.optimize_slope) {
            dims.push(Dimension::new(Axis::Slope, ramp.bounds, settings.slope_steps)?);
        }
        if let Some(storage) = evaluator.storage().filter(|s| s.optimize_offset) {
            let range = storage.offset_range.ok_or_else(|| {
                EarthworkError::Configuration("optimize_offset requires offset_range".into())
            })?;
            dims.push(Dimension::new(Axis::Offset, range, settings.offset_steps)?);
        }
        Ok(Self { dims })
    }

    pub fn from_dimensions(dims: Vec<Dimension>) -> Result<Self, EarthworkError> {
        match dims.first() {
            Some(d) if d.axis == Axis::Height => (),
            _ => {
                return Err(EarthworkError::Configuration(
                    "search space must start with the height dimension".into(),
                ))
            }
        }
        for dim in &dims {
            dim.validate()?;
        }
        Ok(Self { dims })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns `true` when only platform height is searched.
    pub fn is_single(&self) -> bool {
        self.dims.len() == 1
    }

    pub fn coarse_points(&self) -> Vec<ScenarioParams> {
        self.product(self.dims.iter().map(Dimension::coarse_values).collect())
    }

    pub fn fine_points(&self) -> Vec<ScenarioParams> {
        self.product(self.dims.iter().map(Dimension::fine_values).collect())
    }

    /// Fine points around the coarse optimum `center`.
    pub fn refine_points(&self, center: &ScenarioParams) -> Vec<ScenarioParams> {
        self.product(
            self.dims
                .iter()
                .map(|dim| dim.refine(self.coordinate(dim.axis, center)))
                .collect(),
        )
    }

    /// Number of points in the full fine-resolution product.
    pub fn fine_point_count(&self) -> usize {
        self.dims
            .iter()
            .map(|dim| dim.fine_values().len())
            .product()
    }

    fn coordinate(&self, axis: Axis, params: &ScenarioParams) -> f64 {
        match axis {
            Axis::Height => params.platform_height,
            Axis::Slope => params.ramp_slope.unwrap_or_default(),
            Axis::Offset => params.storage_offset.unwrap_or_default(),
        }
    }

    /// Cartesian product of `values` with the first dimension
    /// outermost.
    fn product(&self, values: Vec<Vec<f64>>) -> Vec<ScenarioParams> {
        values
            .into_iter()
            .multi_cartesian_product()
            .map(|point| {
                let mut params = ScenarioParams::at_height(point[0]);
                for (dim, value) in self.dims.iter().zip(point).skip(1) {
                    match dim.axis {
                        Axis::Height => params.platform_height = value,
                        Axis::Slope => params.ramp_slope = Some(value),
                        Axis::Offset => params.storage_offset = Some(value),
                    }
                }
                params
            })
            .collect()
    }
}
