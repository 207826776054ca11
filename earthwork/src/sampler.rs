//! Footprint sampling against an elevation grid.
//!
//! A cell belongs to a footprint when its centre lies inside the
//! polygon. Centres exactly on an edge follow the half-open crossing
//! rule: left and bottom edges are inside, right and top edges are
//! not, so a centre on an edge shared by two adjacent footprints
//! belongs to exactly one of them. [SamplingMethod::Mask] rasterises the polygon one grid
//! row at a time and selects whole spans of cells, which is orders
//! of magnitude faster than testing every cell centre.
//! [SamplingMethod::PerCell] keeps the straightforward point in
//! polygon test around as a reference.

use crate::EarthworkError;
use elevation::ElevationGrid;
use geo::{
    geometry::{Coord, LineString, Point, Polygon, Rect},
    BoundingRect, Centroid, Contains, EuclideanDistance,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Row-wise polygon rasterisation.
    #[default]
    Mask,

    /// Point in polygon test for every cell centre in the footprint's
    /// bounding window.
    PerCell,
}

/// Elevation samples under a footprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Samples {
    /// Terrain elevation of each selected cell.
    pub values: Vec<f64>,

    /// Centre of each selected cell.
    pub points: Vec<Coord<f64>>,

    /// Planar area represented by each sample.
    pub cell_area: f64,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the total planar area covered by the samples.
    #[allow(clippy::cast_precision_loss)]
    pub fn area(&self) -> f64 {
        self.values.len() as f64 * self.cell_area
    }

    /// Returns the mean terrain elevation, if any samples exist.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    fn push(&mut self, value: f64, point: Coord<f64>) {
        self.values.push(value);
        self.points.push(point);
    }
}

/// Samples in the band around a footprint, with each sample's
/// distance to the footprint edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RingSamples {
    pub samples: Samples,
    pub distances: Vec<f64>,
}

/// Returns the valid elevation samples whose cell centres lie inside
/// `polygon`.
///
/// A polygon too small to contain any cell centre is represented by
/// the cell containing its centroid.
pub fn sample(
    grid: &ElevationGrid,
    polygon: &Polygon<f64>,
    method: SamplingMethod,
) -> Result<Samples, EarthworkError> {
    let rect = polygon
        .bounding_rect()
        .ok_or_else(|| EarthworkError::Sampling("footprint has no coordinates".into()))?;
    let window = Window::new(grid, rect).ok_or_else(|| {
        EarthworkError::Sampling(format!(
            "footprint {:?}..{:?} does not intersect grid {:?}..{:?}",
            rect.min(),
            rect.max(),
            grid.bounds().min(),
            grid.bounds().max()
        ))
    })?;

    let cells = match method {
        SamplingMethod::Mask => mask_cells(grid, polygon, &window),
        SamplingMethod::PerCell => per_cell_cells(grid, polygon, &window),
    };

    let mut samples = Samples {
        cell_area: grid.cell_area(),
        ..Samples::default()
    };
    for &(col, row) in &cells {
        if let Some(value) = grid.get(col, row) {
            samples.push(value, grid.cell_center(col, row));
        }
    }

    if cells.is_empty() {
        let cell = polygon
            .centroid()
            .and_then(|centroid| grid.cell_of(centroid.0))
            .and_then(|(col, row)| grid.get(col, row).map(|value| (col, row, value)));
        if let Some((col, row, value)) = cell {
            debug!("footprint covers no cell centre, using centroid cell ({col}, {row})");
            samples.push(value, grid.cell_center(col, row));
        }
    }

    if samples.is_empty() {
        return Err(EarthworkError::Sampling(format!(
            "no valid elevation under footprint ({} cells, all nodata)",
            cells.len()
        )));
    }
    Ok(samples)
}

/// Returns the valid samples outside `polygon` within `width` of its
/// edge, skipping cells that fall inside any of `exclude`.
pub fn sample_ring(
    grid: &ElevationGrid,
    polygon: &Polygon<f64>,
    width: f64,
    exclude: &[&Polygon<f64>],
) -> RingSamples {
    let mut ring = RingSamples {
        samples: Samples {
            cell_area: grid.cell_area(),
            ..Samples::default()
        },
        distances: Vec::new(),
    };
    let Some(rect) = polygon.bounding_rect() else {
        return ring;
    };
    if width <= 0.0 {
        return ring;
    }
    let grown = Rect::new(
        Coord {
            x: rect.min().x - width,
            y: rect.min().y - width,
        },
        Coord {
            x: rect.max().x + width,
            y: rect.max().y + width,
        },
    );
    let Some(window) = Window::new(grid, grown) else {
        return ring;
    };

    for row in window.rows.clone() {
        for col in window.cols.clone() {
            let Some(value) = grid.get(col, row) else {
                continue;
            };
            let center = grid.cell_center(col, row);
            let point = Point::from(center);
            let distance = point.euclidean_distance(polygon);
            if distance > 0.0
                && distance <= width
                && !exclude.iter().any(|other| other.contains(&point))
            {
                ring.samples.push(value, center);
                ring.distances.push(distance);
            }
        }
    }
    ring
}

/// Range of grid columns and rows overlapping a rectangle.
struct Window {
    cols: Range<usize>,
    rows: Range<usize>,
}

impl Window {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn new(grid: &ElevationGrid, rect: Rect<f64>) -> Option<Self> {
        let bounds = grid.bounds();
        if rect.max().x < bounds.min().x
            || rect.min().x > bounds.max().x
            || rect.max().y < bounds.min().y
            || rect.min().y > bounds.max().y
        {
            return None;
        }
        let origin = grid.origin();
        let cs = grid.cell_size();
        let clamp = |v: f64, hi: usize| v.max(0.0).min(hi as f64) as usize;
        let col_start = clamp(((rect.min().x - origin.x) / cs).floor(), grid.cols());
        let col_end = clamp(((rect.max().x - origin.x) / cs).ceil(), grid.cols());
        let row_start = clamp(((origin.y - rect.max().y) / cs).floor(), grid.rows());
        let row_end = clamp(((origin.y - rect.min().y) / cs).ceil(), grid.rows());
        let window = Self {
            cols: col_start..col_end,
            rows: row_start..row_end,
        };
        (!window.cols.is_empty() && !window.rows.is_empty()).then_some(window)
    }
}

/// Scanline rasterisation using the even-odd rule over the exterior
/// and all interior rings.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn mask_cells(
    grid: &ElevationGrid,
    polygon: &Polygon<f64>,
    window: &Window,
) -> Vec<(usize, usize)> {
    let origin = grid.origin();
    let cs = grid.cell_size();
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .collect();

    let mut cells = Vec::new();
    let mut crossings: Vec<f64> = Vec::new();
    for row in window.rows.clone() {
        crossings.clear();
        crossings.extend(row_crossings(&rings, origin, cs, row));
        crossings.sort_by(f64::total_cmp);

        // Cell `col` is selected when its centre lies in [x0, x1).
        let to_col = |col: f64| {
            col.max(window.cols.start as f64).min(window.cols.end as f64) as usize
        };
        for span in crossings.chunks_exact(2) {
            let (start, end) = (to_col(span[0].ceil()), to_col(span[1].ceil()));
            cells.extend((start..end).map(|col| (col, row)));
        }
    }
    cells
}

/// Edge crossings of the horizontal line through the centres of `row`,
/// in fractional column units (a centre sits at an integer value).
#[allow(clippy::cast_precision_loss)]
fn row_crossings<'a>(
    rings: &'a [&'a LineString<f64>],
    origin: Coord<f64>,
    cs: f64,
    row: usize,
) -> impl Iterator<Item = f64> + 'a {
    let y = origin.y - (row as f64 + 0.5) * cs;
    rings
        .iter()
        .copied()
        .flat_map(LineString::lines)
        .filter(move |line| (line.start.y > y) != (line.end.y > y))
        .map(move |line| {
            let (a, b) = (line.start, line.end);
            let x = a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y);
            (x - origin.x) / cs - 0.5
        })
}

/// Tests every cell centre in the window on its own, counting the edge
/// crossings at or left of the centre.
#[allow(clippy::cast_precision_loss)]
fn per_cell_cells(
    grid: &ElevationGrid,
    polygon: &Polygon<f64>,
    window: &Window,
) -> Vec<(usize, usize)> {
    let origin = grid.origin();
    let cs = grid.cell_size();
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .collect();

    let mut cells = Vec::new();
    for row in window.rows.clone() {
        for col in window.cols.clone() {
            let left = row_crossings(&rings, origin, cs, row)
                .filter(|x| *x <= col as f64)
                .count();
            if left % 2 == 1 {
                cells.push((col, row));
            }
        }
    }
    cells
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{sample, sample_ring, SamplingMethod};
    use crate::EarthworkError;
    use approx::assert_relative_eq;
    use elevation::ElevationGrid;
    use geo::{polygon, Coord, LineString, Polygon};

    /// Inclined plane `h = 100 + 0.1 x + 0.05 y` on a 1 m grid
    /// covering [0, cols) x [0, rows).
    pub(crate) fn plane(cols: usize, rows: usize) -> ElevationGrid {
        let mut samples = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let x = col as f64 + 0.5;
                let y = rows as f64 - row as f64 - 0.5;
                samples.push((100.0 + 0.1 * x + 0.05 * y) as f32);
            }
        }
        ElevationGrid::from_samples(
            Coord {
                x: 0.0,
                y: rows as f64,
            },
            1.0,
            (cols, rows),
            -9999.0,
            samples,
        )
        .unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    #[test]
    fn test_rectangle_selects_expected_cells() {
        let grid = plane(50, 40);
        let samples = sample(&grid, &rect(10.2, 5.2, 20.2, 15.2), SamplingMethod::Mask).unwrap();
        assert_eq!(samples.len(), 100);
        assert_relative_eq!(samples.area(), 100.0);
        assert_relative_eq!(samples.cell_area, 1.0);
    }

    #[test]
    fn test_mask_agrees_with_per_cell() {
        let grid = plane(80, 80);
        let outer = LineString::from(vec![
            (10.3, 12.1),
            (61.7, 8.9),
            (70.2, 44.4),
            (38.8, 71.3),
            (5.1, 50.6),
            (10.3, 12.1),
        ]);
        let hole = LineString::from(vec![
            (30.1, 30.2),
            (45.3, 30.7),
            (40.4, 45.9),
            (30.1, 30.2),
        ]);
        let footprint = Polygon::new(outer, vec![hole]);
        let fast = sample(&grid, &footprint, SamplingMethod::Mask).unwrap();
        let slow = sample(&grid, &footprint, SamplingMethod::PerCell).unwrap();
        assert_eq!(fast.len(), slow.len());
        assert_relative_eq!(
            fast.values.iter().sum::<f64>(),
            slow.values.iter().sum::<f64>(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_edges_through_cell_centres() {
        let grid = plane(40, 40);
        // Every edge runs through a row or column of cell centres.
        for footprint in [
            rect(10.5, 10.5, 20.5, 20.5),
            polygon![(x: 5.5, y: 5.5), (x: 25.5, y: 5.5), (x: 15.5, y: 25.5)],
        ] {
            let fast = sample(&grid, &footprint, SamplingMethod::Mask).unwrap();
            let slow = sample(&grid, &footprint, SamplingMethod::PerCell).unwrap();
            assert_eq!(fast.points, slow.points);
        }
        let samples = sample(&grid, &rect(10.5, 10.5, 20.5, 20.5), SamplingMethod::PerCell).unwrap();
        assert_eq!(samples.len(), 100);
        assert!(samples
            .points
            .iter()
            .all(|p| (10.5..20.5).contains(&p.x) && (10.5..20.5).contains(&p.y)));
    }

    #[test]
    fn test_shared_edge_cells_belong_to_one_footprint() {
        let grid = plane(40, 40);
        for method in [SamplingMethod::Mask, SamplingMethod::PerCell] {
            let left = sample(&grid, &rect(5.0, 5.0, 12.5, 15.0), method).unwrap();
            let right = sample(&grid, &rect(12.5, 5.0, 20.0, 15.0), method).unwrap();
            assert_eq!(left.len() + right.len(), 150);
            assert!(left.points.iter().all(|p| !right.points.contains(p)));
        }
    }

    #[test]
    fn test_footprint_off_grid_is_sampling_error() {
        let grid = plane(10, 10);
        let err = sample(&grid, &rect(100.0, 100.0, 110.0, 110.0), SamplingMethod::Mask);
        assert!(matches!(err, Err(EarthworkError::Sampling(_))));
    }

    #[test]
    fn test_partially_off_grid_is_clipped() {
        let grid = plane(10, 10);
        let samples = sample(&grid, &rect(-5.0, -5.0, 5.0, 5.0), SamplingMethod::Mask).unwrap();
        assert_eq!(samples.len(), 25);
    }

    #[test]
    fn test_tiny_footprint_uses_centroid_cell() {
        let grid = plane(10, 10);
        let samples = sample(&grid, &rect(3.1, 3.1, 3.3, 3.3), SamplingMethod::Mask).unwrap();
        assert_eq!(samples.len(), 1);
        assert_relative_eq!(samples.points[0].x, 3.5);
    }

    #[test]
    fn test_all_nodata_is_sampling_error() {
        let grid =
            ElevationGrid::from_samples(Coord { x: 0.0, y: 4.0 }, 1.0, (4, 4), -1.0, vec![-1.0; 16])
                .unwrap();
        let err = sample(&grid, &rect(0.0, 0.0, 4.0, 4.0), SamplingMethod::PerCell);
        assert!(matches!(err, Err(EarthworkError::Sampling(_))));
    }

    #[test]
    fn test_ring_excludes_footprints_and_far_cells() {
        let grid = plane(40, 40);
        let pad = rect(10.0, 10.0, 20.0, 20.0);
        let neighbour = rect(20.0, 10.0, 30.0, 20.0);
        let ring = sample_ring(&grid, &pad, 3.0, &[&neighbour]);
        assert!(!ring.samples.is_empty());
        assert_eq!(ring.samples.len(), ring.distances.len());
        for (point, distance) in ring.samples.points.iter().zip(&ring.distances) {
            assert!(*distance > 0.0 && *distance <= 3.0);
            assert!(!(point.x > 20.0 && point.x < 30.0 && point.y > 10.0 && point.y < 20.0));
        }
        assert!(sample_ring(&grid, &pad, 0.0, &[]).samples.is_empty());
    }
}
