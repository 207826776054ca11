//! ESRI ASCII grid (`.asc`) format.
//!
//! ```text
//! ncols        4
//! nrows        3
//! xllcorner    100.0
//! yllcorner    200.0
//! cellsize     1.0
//! NODATA_value -9999
//! 10 11 12 13
//! ...
//! ```

use crate::{sample_count, ElevationGrid, GridError, SampleStore, C};
use geo::geometry::Coord;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

const DEFAULT_NODATA: f32 = -9999.0;

#[derive(Default)]
struct Header {
    ncols: Option<usize>,
    nrows: Option<usize>,
    xll: Option<(C, bool)>,
    yll: Option<(C, bool)>,
    cellsize: Option<C>,
    nodata: Option<f32>,
}

pub(crate) fn load(path: &Path) -> Result<ElevationGrid, GridError> {
    let text = fs::read_to_string(path)?;
    let mk_err = |reason: String| GridError::Header {
        path: path.to_owned(),
        reason,
    };

    let mut tokens = text.split_whitespace().peekable();
    let mut header = Header::default();

    while let Some(key) = tokens.peek().map(|key| key.to_ascii_lowercase()) {
        if !key.starts_with(|c: char| c.is_ascii_alphabetic()) || key == "nan" {
            break;
        }
        tokens.next();
        let value = tokens
            .next()
            .ok_or_else(|| mk_err(format!("missing value for {key}")))?;
        let parse_f = || {
            value
                .parse::<C>()
                .map_err(|_| mk_err(format!("invalid {key} '{value}'")))
        };
        let parse_u = || {
            value
                .parse::<usize>()
                .map_err(|_| mk_err(format!("invalid {key} '{value}'")))
        };
        match key.as_str() {
            "ncols" => header.ncols = Some(parse_u()?),
            "nrows" => header.nrows = Some(parse_u()?),
            "xllcorner" => header.xll = Some((parse_f()?, false)),
            "xllcenter" => header.xll = Some((parse_f()?, true)),
            "yllcorner" => header.yll = Some((parse_f()?, false)),
            "yllcenter" => header.yll = Some((parse_f()?, true)),
            "cellsize" => header.cellsize = Some(parse_f()?),
            #[allow(clippy::cast_possible_truncation)]
            "nodata_value" => header.nodata = Some(parse_f()? as f32),
            _ => return Err(mk_err(format!("unknown key {key}"))),
        }
    }

    let missing = |key: &str| mk_err(format!("missing {key}"));
    let cols = header.ncols.ok_or_else(|| missing("ncols"))?;
    let rows = header.nrows.ok_or_else(|| missing("nrows"))?;
    let cell_size = header.cellsize.ok_or_else(|| missing("cellsize"))?;
    let (xll, x_is_center) = header.xll.ok_or_else(|| missing("xllcorner"))?;
    let (yll, y_is_center) = header.yll.ok_or_else(|| missing("yllcorner"))?;
    let half = cell_size / 2.0;
    let x_min = if x_is_center { xll - half } else { xll };
    let y_min = if y_is_center { yll - half } else { yll };
    #[allow(clippy::cast_precision_loss)]
    let y_max = y_min + rows as C * cell_size;

    let samples = tokens
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f32>().map_err(|_| GridError::Sample {
                token: token.to_owned(),
                index,
            })
        })
        .collect::<Result<Vec<f32>, GridError>>()?;
    let expected = sample_count(cols, rows)?;
    if samples.len() != expected {
        return Err(GridError::SampleCount {
            expected,
            actual: samples.len(),
        });
    }

    ElevationGrid::from_store(
        Coord { x: x_min, y: y_max },
        cell_size,
        (cols, rows),
        header.nodata.unwrap_or(DEFAULT_NODATA),
        None,
        SampleStore::InMem(samples.into_boxed_slice()),
    )
}

pub(crate) fn save(grid: &ElevationGrid, path: &Path) -> Result<(), GridError> {
    let mut wtr = BufWriter::new(File::create(path)?);
    let bounds = grid.bounds();
    writeln!(wtr, "ncols {}", grid.cols)?;
    writeln!(wtr, "nrows {}", grid.rows)?;
    writeln!(wtr, "xllcorner {}", bounds.min().x)?;
    writeln!(wtr, "yllcorner {}", bounds.min().y)?;
    writeln!(wtr, "cellsize {}", grid.cell_size)?;
    writeln!(wtr, "NODATA_value {}", grid.nodata)?;
    let mut samples = grid.raw_samples();
    for _ in 0..grid.rows {
        let line = samples
            .by_ref()
            .take(grid.cols)
            .map(|raw| if raw.is_nan() { grid.nodata } else { raw })
            .map(|raw| raw.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(wtr, "{line}")?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::load;
    use crate::{ElevationGrid, GridError, GridMode};
    use approx::assert_relative_eq;
    use std::fs;

    #[test]
    fn test_parse_center_registered_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.asc");
        fs::write(
            &path,
            "NCOLS 3\nNROWS 2\nXLLCENTER 500.5\nYLLCENTER 1000.5\nCELLSIZE 1\nNODATA_VALUE -1\n\
             1 2 3\n4 -1 6\n",
        )
        .unwrap();
        let grid = load(&path).unwrap();
        assert_eq!(grid.dimensions(), (3, 2));
        assert_relative_eq!(grid.origin().x, 500.0);
        assert_relative_eq!(grid.origin().y, 1002.0);
        assert_eq!(grid.get(0, 0), Some(1.0));
        assert_eq!(grid.get(1, 1), None);
        assert_eq!(grid.get(2, 1), Some(6.0));
    }

    #[test]
    fn test_missing_samples_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.asc");
        fs::write(
            &path,
            "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n",
        )
        .unwrap();
        assert!(matches!(
            ElevationGrid::open(&path, GridMode::InMem),
            Err(GridError::SampleCount {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_save_then_open_keeps_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.asc");
        let grid = ElevationGrid::from_samples(
            geo::Coord { x: 10.0, y: 20.0 },
            2.0,
            (2, 2),
            -9999.0,
            vec![1.25, f32::NAN, 3.5, 4.0],
        )
        .unwrap();
        grid.save(&path).unwrap();
        // MemMap silently degrades to in-memory parsing for ASCII.
        let reopened = ElevationGrid::open(&path, GridMode::MemMap).unwrap();
        assert_eq!(reopened.get(0, 0), Some(1.25));
        assert_eq!(reopened.get(1, 0), None);
        assert_relative_eq!(reopened.bounds().min().y, 16.0);
    }
}
