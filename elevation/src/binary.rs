//! Native binary grid (`.egrid`) format.
//!
//! All fields little-endian:
//!
//! | field     | type        |
//! |-----------|-------------|
//! | magic     | `b"EGRID"`  |
//! | version   | `u8`        |
//! | cols      | `u32`       |
//! | rows      | `u32`       |
//! | x_min     | `f64`       |
//! | y_max     | `f64`       |
//! | cell_size | `f64`       |
//! | nodata    | `f32`       |
//! | crs_len   | `u16`       |
//! | crs       | UTF-8 bytes |
//! | samples   | `[f32]`     |

use crate::{sample_count, ElevationGrid, GridError, SampleStore};
use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use geo::geometry::Coord;
use memmap2::Mmap;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    mem::size_of,
    path::Path,
};

const MAGIC: &[u8; 5] = b"EGRID";
const VERSION: u8 = 1;
/// Header length without the variable length CRS.
const FIXED_HEADER_LEN: usize = 5 + 1 + 4 + 4 + 8 + 8 + 8 + 4 + 2;

struct Header {
    dimensions: (usize, usize),
    origin: Coord<f64>,
    cell_size: f64,
    nodata: f32,
    crs: Option<String>,
}

impl Header {
    fn len(&self) -> usize {
        FIXED_HEADER_LEN + self.crs.as_ref().map_or(0, String::len)
    }

    /// Checks the declared dimensions against a file of `file_len`
    /// bytes and returns the sample count.
    fn check_len(&self, file_len: u64) -> Result<usize, GridError> {
        let (cols, rows) = self.dimensions;
        let expected = sample_count(cols, rows)?;
        let available = usize::try_from(file_len)
            .unwrap_or(usize::MAX)
            .saturating_sub(self.len())
            / size_of::<f32>();
        if available != expected {
            return Err(GridError::SampleCount {
                expected,
                actual: available,
            });
        }
        Ok(expected)
    }

    fn read<R: Read>(rdr: &mut R, path: &Path) -> Result<Self, GridError> {
        let mk_err = |reason: &str| GridError::Header {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        let mut magic = [0_u8; 5];
        rdr.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(mk_err("bad magic"));
        }
        let version = rdr.read_u8()?;
        if version != VERSION {
            return Err(GridError::Version(version));
        }
        let cols = rdr.read_u32::<LE>()? as usize;
        let rows = rdr.read_u32::<LE>()? as usize;
        let x_min = rdr.read_f64::<LE>()?;
        let y_max = rdr.read_f64::<LE>()?;
        let cell_size = rdr.read_f64::<LE>()?;
        let nodata = rdr.read_f32::<LE>()?;
        let crs_len = rdr.read_u16::<LE>()? as usize;
        let crs = if crs_len == 0 {
            None
        } else {
            let mut raw = vec![0_u8; crs_len];
            rdr.read_exact(&mut raw)?;
            Some(String::from_utf8(raw).map_err(|_| mk_err("crs is not UTF-8"))?)
        };
        Ok(Self {
            dimensions: (cols, rows),
            origin: Coord { x: x_min, y: y_max },
            cell_size,
            nodata,
            crs,
        })
    }
}

/// Returns a grid read into memory from the file at `path`.
pub(crate) fn load(path: &Path) -> Result<ElevationGrid, GridError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut file = BufReader::new(file);
    let header = Header::read(&mut file, path)?;
    let expected = header.check_len(file_len)?;

    let mut samples = Vec::with_capacity(expected);
    for index in 0..expected {
        match file.read_f32::<LE>() {
            Ok(sample) => samples.push(sample),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(GridError::SampleCount {
                    expected,
                    actual: index,
                })
            }
            Err(e) => return Err(e.into()),
        }
    }

    ElevationGrid::from_store(
        header.origin,
        header.cell_size,
        header.dimensions,
        header.nodata,
        header.crs,
        SampleStore::InMem(samples.into_boxed_slice()),
    )
}

/// Returns a grid using the memory-mapped file as storage.
pub(crate) fn memmap(path: &Path) -> Result<ElevationGrid, GridError> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    let header = Header::read(&mut &map[..], path)?;
    header.check_len(map.len() as u64)?;
    let offset = header.len();

    ElevationGrid::from_store(
        header.origin,
        header.cell_size,
        header.dimensions,
        header.nodata,
        header.crs,
        SampleStore::MemMap { map, offset },
    )
}

pub(crate) fn save(grid: &ElevationGrid, path: &Path) -> Result<(), GridError> {
    let mk_err = |reason: &str| GridError::Header {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };
    let cols = u32::try_from(grid.cols).map_err(|_| mk_err("too many columns"))?;
    let rows = u32::try_from(grid.rows).map_err(|_| mk_err("too many rows"))?;
    let crs = grid.crs().unwrap_or_default().as_bytes();
    let crs_len = u16::try_from(crs.len()).map_err(|_| mk_err("crs too long"))?;

    let mut wtr = BufWriter::new(File::create(path)?);
    wtr.write_all(MAGIC)?;
    wtr.write_u8(VERSION)?;
    wtr.write_u32::<LE>(cols)?;
    wtr.write_u32::<LE>(rows)?;
    wtr.write_f64::<LE>(grid.x_min)?;
    wtr.write_f64::<LE>(grid.y_max)?;
    wtr.write_f64::<LE>(grid.cell_size)?;
    wtr.write_f32::<LE>(grid.nodata)?;
    wtr.write_u16::<LE>(crs_len)?;
    wtr.write_all(crs)?;
    for sample in grid.raw_samples() {
        wtr.write_f32::<LE>(sample)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load, memmap, FIXED_HEADER_LEN};
    use crate::{ElevationGrid, GridError};
    use geo::Coord;
    use std::fs;

    #[test]
    fn test_header_len_matches_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.egrid");
        ElevationGrid::from_samples(Coord { x: 0.0, y: 1.0 }, 1.0, (1, 1), -9999.0, vec![7.0])
            .unwrap()
            .with_crs("EPSG:3006")
            .save(&path)
            .unwrap();
        let len = fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, FIXED_HEADER_LEN + "EPSG:3006".len() + 4);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.egrid");
        ElevationGrid::from_samples(Coord { x: 0.0, y: 2.0 }, 1.0, (2, 2), -9999.0, vec![1.0; 4])
            .unwrap()
            .save(&path)
            .unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(
            memmap(&path),
            Err(GridError::SampleCount {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_corrupt_dimensions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.egrid");
        ElevationGrid::from_samples(Coord { x: 0.0, y: 2.0 }, 1.0, (2, 2), -9999.0, vec![1.0; 4])
            .unwrap()
            .save(&path)
            .unwrap();
        let mut bytes = fs::read(&path).unwrap();
        // cols and rows follow the magic and version byte.
        bytes[6..14].copy_from_slice(&[0xff; 8]);
        fs::write(&path, &bytes).unwrap();
        for result in [load(&path), memmap(&path)] {
            assert!(matches!(
                result,
                Err(GridError::SampleCount { actual: 4, .. } | GridError::Dimensions { .. })
            ));
        }
    }
}
