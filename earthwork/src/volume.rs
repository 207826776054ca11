//! Cut and fill volume accumulation.

use crate::sampler::{RingSamples, Samples};
use geo::{
    geometry::{Coord, Point, Polygon},
    Intersects,
};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Material removed from (`cut`) and added to (`fill`) the terrain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CutFill {
    pub cut: f64,
    pub fill: f64,
}

impl CutFill {
    /// `|cut - fill|`
    pub fn net(&self) -> f64 {
        (self.cut - self.fill).abs()
    }

    /// `cut + fill`
    pub fn total(&self) -> f64 {
        self.cut + self.fill
    }

    /// Accumulates one sample against its target elevation.
    fn add_sample(&mut self, terrain: f64, target: f64, cell_area: f64, may_fill: bool) {
        if terrain > target {
            self.cut += (terrain - target) * cell_area;
        } else if may_fill {
            self.fill += (target - terrain) * cell_area;
        }
    }
}

impl Add for CutFill {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            cut: self.cut + rhs.cut,
            fill: self.fill + rhs.fill,
        }
    }
}

impl AddAssign for CutFill {
    fn add_assign(&mut self, rhs: Self) {
        self.cut += rhs.cut;
        self.fill += rhs.fill;
    }
}

/// Where fill may be placed under a surface.
///
/// Without support polygons every terrain deficit is filled. With
/// support polygons, fill is only placed under them; the structure
/// spans deficits elsewhere. Cut applies everywhere regardless.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FillPolicy {
    #[default]
    Full,

    /// Per-sample flag: `true` when the sample may receive fill.
    SupportOnly(Vec<bool>),
}

impl FillPolicy {
    /// Resolves `supports` against sample points. A point on a support
    /// boundary counts as supported.
    pub fn from_supports(points: &[Coord<f64>], supports: &[Polygon<f64>]) -> Self {
        if supports.is_empty() {
            Self::Full
        } else {
            Self::SupportOnly(
                points
                    .iter()
                    .map(|p| {
                        let point = Point::from(*p);
                        supports.iter().any(|support| support.intersects(&point))
                    })
                    .collect(),
            )
        }
    }

    pub fn allows_fill(&self, index: usize) -> bool {
        match self {
            Self::Full => true,
            Self::SupportOnly(mask) => mask.get(index).copied().unwrap_or(false),
        }
    }
}

/// Cut and fill of `values` against a flat `target`.
pub fn cut_fill(values: &[f64], target: f64, cell_area: f64) -> CutFill {
    let mut acc = CutFill::default();
    for &h in values {
        acc.add_sample(h, target, cell_area, true);
    }
    acc
}

/// Cut and fill of `samples` against a per-sample target elevation.
pub fn cut_fill_with<F>(samples: &Samples, target: F, policy: &FillPolicy) -> CutFill
where
    F: Fn(usize) -> f64,
{
    let mut acc = CutFill::default();
    for (idx, &h) in samples.values.iter().enumerate() {
        acc.add_sample(h, target(idx), samples.cell_area, policy.allows_fill(idx));
    }
    acc
}

/// Cut and fill of the batter slopes around a level surface at
/// `edge_elevation`.
///
/// Terrain above the edge is cut back to a slope rising at
/// `slope_deg` away from the edge; terrain below is filled up to an
/// embankment falling at the same angle. Where the slope meets the
/// terrain inside the ring, the sample contributes nothing.
pub fn batter_cut_fill(ring: &RingSamples, edge_elevation: f64, slope_deg: f64) -> CutFill {
    let grade = slope_deg.to_radians().tan();
    let cell_area = ring.samples.cell_area;
    let mut acc = CutFill::default();
    for (&h, &d) in ring.samples.values.iter().zip(&ring.distances) {
        if h > edge_elevation {
            acc.cut += (h - (edge_elevation + d * grade)).max(0.0) * cell_area;
        } else {
            acc.fill += ((edge_elevation - d * grade) - h).max(0.0) * cell_area;
        }
    }
    acc
}

/// Volume of imported surfacing material over `area`.
///
/// Kept apart from the cut/fill balance.
pub fn external_volume(area: f64, thickness: f64) -> f64 {
    (area * thickness).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::{
        batter_cut_fill, cut_fill, cut_fill_with, external_volume, CutFill, FillPolicy,
    };
    use crate::sampler::{RingSamples, Samples};
    use approx::assert_relative_eq;
    use geo::{polygon, Coord};

    fn single(h: f64, at: Coord<f64>) -> Samples {
        Samples {
            values: vec![h],
            points: vec![at],
            cell_area: 1.0,
        }
    }

    #[test]
    fn test_flat_target() {
        let cf = cut_fill(&[10.0, 12.0, 11.0, 8.5], 11.0, 2.0);
        assert_relative_eq!(cf.cut, 2.0);
        assert_relative_eq!(cf.fill, 7.0);
        assert_relative_eq!(cf.net(), 5.0);
        assert_relative_eq!(cf.total(), 9.0);
    }

    #[test]
    fn test_net_never_exceeds_total() {
        let values: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.37).sin() * 3.0).collect();
        for target in [95.0, 99.5, 100.0, 101.3, 104.0] {
            let cf = cut_fill(&values, target, 0.25);
            assert!(cf.cut >= 0.0 && cf.fill >= 0.0);
            assert!(cf.net() <= cf.total());
        }
    }

    #[test]
    fn test_deficit_without_supports_is_filled() {
        let samples = single(127.0, Coord { x: 5.0, y: 5.0 });
        let policy = FillPolicy::from_supports(&samples.points, &[]);
        let cf = cut_fill_with(&samples, |_| 128.0, &policy);
        assert_relative_eq!(cf.fill, 1.0);
        assert_relative_eq!(cf.cut, 0.0);
    }

    #[test]
    fn test_deficit_outside_supports_is_spanned() {
        let support = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let samples = single(127.0, Coord { x: 5.0, y: 5.0 });
        let policy = FillPolicy::from_supports(&samples.points, &[support.clone()]);
        assert_eq!(cut_fill_with(&samples, |_| 128.0, &policy), CutFill::default());

        let inside = single(127.0, Coord { x: 1.0, y: 1.0 });
        let policy = FillPolicy::from_supports(&inside.points, &[support]);
        assert_relative_eq!(cut_fill_with(&inside, |_| 128.0, &policy).fill, 1.0);
    }

    #[test]
    fn test_cut_ignores_supports() {
        let support = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let samples = single(129.5, Coord { x: 50.0, y: 50.0 });
        let policy = FillPolicy::from_supports(&samples.points, &[support]);
        assert_relative_eq!(cut_fill_with(&samples, |_| 128.0, &policy).cut, 1.5);
    }

    #[test]
    fn test_batter_slopes() {
        // 45 degrees: the slope changes elevation by one metre per metre.
        let ring = RingSamples {
            samples: Samples {
                values: vec![105.0, 95.0, 101.0, 99.5],
                points: vec![Coord { x: 0.0, y: 0.0 }; 4],
                cell_area: 1.0,
            },
            distances: vec![2.0, 3.0, 2.0, 1.0],
        };
        let cf = batter_cut_fill(&ring, 100.0, 45.0);
        // 105 vs 102 -> 3 cut, 101 vs 102 -> 0.
        assert_relative_eq!(cf.cut, 3.0, epsilon = 1e-9);
        // 95 vs 97 -> 2 fill, 99.5 vs 99 -> 0.
        assert_relative_eq!(cf.fill, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_external_volume() {
        assert_relative_eq!(external_volume(500.0, 0.5), 250.0);
        assert_relative_eq!(external_volume(500.0, 0.0), 0.0);
    }
}
