//! Global relief grid used for bounce-point water depths.
//!
//! The topography file is a Fortran-unformatted dump of a 1080 x 540
//! short-integer grid, three cells per degree with cell-centered
//! registration. Sampling goes through the same bilinear interpolator and
//! axis abstraction as the ellipticity tables.

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::Array2;
use std::io::Read;

use crate::ellip::{AxisEnum, EvenAxis, bilinear};
use crate::error::{Error, Result};

/// Grid cells per degree.
const CELLS_PER_DEGREE: f64 = 3.0;
/// Longitude cells.
const NLON: usize = 1080;
/// Latitude cells.
const NLAT: usize = 540;

/// Minimum water depth in kilometers for a `pwP` bounce point.
pub const MIN_PWP_WATER_DEPTH: f64 = 1.5;

/// The global relief grid, in meters above sea level.
#[derive(Clone, Debug)]
pub struct Topography {
    grid: Array2<f64>,
    lat_axis: AxisEnum,
    lon_axis: AxisEnum,
}

impl Topography {
    /// Wrap an elevation grid of shape `(NLAT, NLON)`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] on a wrong shape.
    pub fn new(grid: Array2<f64>) -> Result<Self> {
        if grid.nrows() != NLAT || grid.ncols() != NLON {
            return Err(Error::TableIntegrity(format!(
                "topography grid is {}x{}, expected {NLAT}x{NLON}",
                grid.nrows(),
                grid.ncols()
            )));
        }
        let half = 0.5 / CELLS_PER_DEGREE;
        Ok(Self {
            grid,
            lat_axis: EvenAxis::new(-90.0 + half, 1.0 / CELLS_PER_DEGREE, NLAT).into(),
            lon_axis: EvenAxis::new(-180.0 + half, 1.0 / CELLS_PER_DEGREE, NLON).into(),
        })
    }

    /// Read the Fortran-unformatted relief file: one length-delimited
    /// record of 1080 little-endian shorts per latitude row, south first.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] on record-length mismatches and
    /// with [`Error::Io`] on truncated reads.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut grid = Array2::zeros((NLAT, NLON));
        let expected = (NLON * 2) as u32;
        for row in 0..NLAT {
            let head = reader.read_u32::<LittleEndian>()?;
            if head != expected {
                return Err(Error::TableIntegrity(format!(
                    "topography record {row} has length {head}, expected {expected}"
                )));
            }
            for col in 0..NLON {
                grid[[row, col]] = f64::from(reader.read_i16::<LittleEndian>()?);
            }
            let tail = reader.read_u32::<LittleEndian>()?;
            if tail != expected {
                return Err(Error::TableIntegrity(format!(
                    "topography record {row} has trailing length {tail}, expected {expected}"
                )));
            }
        }
        Self::new(grid)
    }

    /// Elevation in meters at a geographic point, or `None` outside the
    /// cell-centered grid margins.
    #[must_use]
    pub fn elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        let mut lon = lon;
        if lon >= 180.0 {
            lon -= 360.0;
        } else if lon < -180.0 {
            lon += 360.0;
        }
        bilinear(&self.lat_axis, &self.lon_axis, &self.grid, lat, lon)
    }

    /// Water-column thickness in kilometers, zero on land.
    #[must_use]
    pub fn water_depth(&self, lat: f64, lon: f64) -> f64 {
        self.elevation(lat, lon)
            .map_or(0.0, |elev| (-elev).max(0.0) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use float_cmp::assert_approx_eq;

    fn flat_grid(value: f64) -> Topography {
        Topography::new(Array2::from_elem((NLAT, NLON), value)).unwrap()
    }

    #[test]
    fn constant_grid_interpolates_to_itself() {
        let topo = flat_grid(-4200.0);
        assert_approx_eq!(f64, topo.elevation(12.0, 145.0).unwrap(), -4200.0, epsilon = 1e-9);
        assert_approx_eq!(f64, topo.water_depth(12.0, 145.0), 4.2, epsilon = 1e-12);
    }

    #[test]
    fn land_has_zero_water_depth() {
        let topo = flat_grid(833.0);
        assert_approx_eq!(f64, topo.water_depth(40.0, -105.0), 0.0, epsilon = 0.0);
    }

    #[test]
    fn longitudes_wrap() {
        let topo = flat_grid(-100.0);
        assert!(topo.elevation(0.0, 185.0).is_some());
        assert!(topo.elevation(0.0, -185.0).is_some());
    }

    #[test]
    fn wrong_shape_is_rejected() {
        assert!(matches!(
            Topography::new(Array2::zeros((10, 10))),
            Err(Error::TableIntegrity(_))
        ));
    }

    #[test]
    fn fortran_records_round_trip() {
        let mut bytes = Vec::new();
        for _ in 0..NLAT {
            bytes.write_u32::<LittleEndian>((NLON * 2) as u32).unwrap();
            for col in 0..NLON {
                bytes.write_i16::<LittleEndian>(col as i16).unwrap();
            }
            bytes.write_u32::<LittleEndian>((NLON * 2) as u32).unwrap();
        }
        let topo = Topography::from_reader(bytes.as_slice()).unwrap();
        // Column 540 center sits at lon 0.1667 degrees.
        let sampled = topo.elevation(0.0, -180.0 + (540.5) / 3.0).unwrap();
        assert_approx_eq!(f64, sampled, 540.0, epsilon = 0.5);
    }

    #[test]
    fn bad_record_length_is_an_integrity_error() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(7).unwrap();
        assert!(matches!(
            Topography::from_reader(bytes.as_slice()),
            Err(Error::TableIntegrity(_))
        ));
    }
}
