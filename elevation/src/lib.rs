//! Projected elevation grids.
//!
//! An [ElevationGrid] is a north-up raster in a projected (metric)
//! coordinate reference system. Samples are stored row-major, north
//! to south, west to east. The grid origin is the _outer_ corner of
//! the north-west cell.
//!
//! # Formats
//!
//! 1. ESRI ASCII grid (`.asc`), always parsed into memory.
//! 1. Native binary grid (`.egrid`), parsed into memory or memory
//!    mapped.

mod ascii;
mod binary;
mod error;

pub use crate::error::GridError;
use byteorder::{ByteOrder, LittleEndian as LE};
use geo::geometry::{Coord, Rect};
use log::debug;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::{mem::size_of, path::Path, sync::OnceLock};

/// Base floating point type used for coordinates and elevations.
pub type C = f64;

pub struct ElevationGrid {
    /// West edge of the westernmost column.
    x_min: C,

    /// North edge of the northernmost row.
    y_max: C,

    /// Edge length of a (square) cell in CRS units.
    cell_size: C,

    /// Number of columns.
    cols: usize,

    /// Number of rows.
    rows: usize,

    /// Samples equal to this value carry no data.
    nodata: f32,

    /// Coordinate reference identifier, e.g. `EPSG:25832`.
    crs: Option<String>,

    /// Lowest and highest valid sample, computed on first use.
    extrema: OnceLock<Option<(C, C)>>,

    /// Elevation samples.
    samples: SampleStore,
}

enum SampleStore {
    InMem(Box<[f32]>),
    MemMap { map: Mmap, offset: usize },
}

impl SampleStore {
    fn get_unchecked(&self, index: usize) -> f32 {
        match self {
            Self::InMem(samples) => samples[index],
            Self::MemMap { map, offset } => {
                let start = offset + index * size_of::<f32>();
                LE::read_f32(&map[start..start + size_of::<f32>()])
            }
        }
    }
}

/// How to load grid samples.
///
/// Memory mapping lets every worker open the same grid without each
/// holding a private copy of the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    /// Parse samples into memory.
    #[default]
    InMem,

    /// Memory map file contents. Only the binary format supports
    /// this; ASCII grids silently fall back to [GridMode::InMem].
    MemMap,
}

impl ElevationGrid {
    /// Returns a grid built from raw row-major samples.
    ///
    /// `origin` is the north-west corner of the grid.
    pub fn from_samples(
        origin: Coord<C>,
        cell_size: C,
        (cols, rows): (usize, usize),
        nodata: f32,
        samples: Vec<f32>,
    ) -> Result<Self, GridError> {
        validate(origin, cell_size)?;
        let expected = sample_count(cols, rows)?;
        if samples.len() != expected {
            return Err(GridError::SampleCount {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            x_min: origin.x,
            y_max: origin.y,
            cell_size,
            cols,
            rows,
            nodata,
            crs: None,
            extrema: OnceLock::new(),
            samples: SampleStore::InMem(samples.into_boxed_slice()),
        })
    }

    /// Attaches a coordinate reference identifier.
    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Opens the grid at `path`, choosing the format by extension.
    pub fn open<P: AsRef<Path>>(path: P, mode: GridMode) -> Result<Self, GridError> {
        let path = path.as_ref();
        debug!("opening {path:?} ({mode:?})");
        match extension(path).as_deref() {
            Some("asc") => ascii::load(path),
            Some("egrid") => match mode {
                GridMode::InMem => binary::load(path),
                GridMode::MemMap => binary::memmap(path),
            },
            _ => Err(GridError::Extension(path.to_owned())),
        }
    }

    /// Writes the grid to `path`, choosing the format by extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), GridError> {
        let path = path.as_ref();
        match extension(path).as_deref() {
            Some("asc") => ascii::save(self, path),
            Some("egrid") => binary::save(self, path),
            _ => Err(GridError::Extension(path.to_owned())),
        }
    }

    /// Returns the number of samples in this grid.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    /// Returns (columns, rows).
    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cell_size(&self) -> C {
        self.cell_size
    }

    /// Returns the planar area covered by one cell.
    pub fn cell_area(&self) -> C {
        self.cell_size * self.cell_size
    }

    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    /// Returns the north-west corner of the grid.
    pub fn origin(&self) -> Coord<C> {
        Coord {
            x: self.x_min,
            y: self.y_max,
        }
    }

    /// Returns the outer extent of the grid.
    #[allow(clippy::cast_precision_loss)]
    pub fn bounds(&self) -> Rect<C> {
        Rect::new(
            Coord {
                x: self.x_min,
                y: self.y_max - self.rows as C * self.cell_size,
            },
            Coord {
                x: self.x_min + self.cols as C * self.cell_size,
                y: self.y_max,
            },
        )
    }

    /// Returns `true` if `value` should be treated as missing.
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || value == self.nodata
    }

    /// Returns the raw sample at (`col`, `row`), nodata included.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of range.
    pub fn get_unchecked(&self, col: usize, row: usize) -> f32 {
        self.samples.get_unchecked(row * self.cols + col)
    }

    /// Returns the elevation at (`col`, `row`), or `None` when out of
    /// range or nodata.
    pub fn get(&self, col: usize, row: usize) -> Option<C> {
        if col < self.cols && row < self.rows {
            let raw = self.get_unchecked(col, row);
            (!self.is_nodata(raw)).then(|| C::from(raw))
        } else {
            None
        }
    }

    /// Returns the elevation of the cell containing `coord`.
    pub fn get_at(&self, coord: Coord<C>) -> Option<C> {
        self.cell_of(coord).and_then(|(col, row)| self.get(col, row))
    }

    /// Returns the centre of cell (`col`, `row`).
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_center(&self, col: usize, row: usize) -> Coord<C> {
        Coord {
            x: self.x_min + (col as C + 0.5) * self.cell_size,
            y: self.y_max - (row as C + 0.5) * self.cell_size,
        }
    }

    /// Returns the (`col`, `row`) of the cell containing `coord`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cell_of(&self, coord: Coord<C>) -> Option<(usize, usize)> {
        let col = ((coord.x - self.x_min) / self.cell_size).floor();
        let row = ((self.y_max - coord.y) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        (col < self.cols && row < self.rows).then_some((col, row))
    }

    /// Returns the lowest valid elevation in this grid.
    pub fn min_elevation(&self) -> Option<C> {
        self.extrema().map(|(min, _)| min)
    }

    /// Returns the highest valid elevation in this grid.
    pub fn max_elevation(&self) -> Option<C> {
        self.extrema().map(|(_, max)| max)
    }
}

/// Private API
impl ElevationGrid {
    fn extrema(&self) -> Option<(C, C)> {
        *self.extrema.get_or_init(|| {
            (0..self.len())
                .map(|idx| self.samples.get_unchecked(idx))
                .filter(|raw| !self.is_nodata(*raw))
                .map(C::from)
                .fold(None, |acc, h| match acc {
                    None => Some((h, h)),
                    Some((lo, hi)) => Some((C::min(lo, h), C::max(hi, h))),
                })
        })
    }

    fn from_store(
        origin: Coord<C>,
        cell_size: C,
        (cols, rows): (usize, usize),
        nodata: f32,
        crs: Option<String>,
        samples: SampleStore,
    ) -> Result<Self, GridError> {
        validate(origin, cell_size)?;
        Ok(Self {
            x_min: origin.x,
            y_max: origin.y,
            cell_size,
            cols,
            rows,
            nodata,
            crs,
            extrema: OnceLock::new(),
            samples,
        })
    }

    /// Iterates over all raw samples in storage order.
    fn raw_samples(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.len()).map(|idx| self.samples.get_unchecked(idx))
    }
}

fn validate(origin: Coord<C>, cell_size: C) -> Result<(), GridError> {
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(GridError::CellSize(cell_size));
    }
    if !(origin.x.is_finite() && origin.y.is_finite()) {
        return Err(GridError::Origin);
    }
    Ok(())
}

/// Returns `cols * rows`, or an error when it does not fit a `usize`.
pub(crate) fn sample_count(cols: usize, rows: usize) -> Result<usize, GridError> {
    cols.checked_mul(rows).ok_or(GridError::Dimensions { cols, rows })
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_ascii_lowercase)
}
