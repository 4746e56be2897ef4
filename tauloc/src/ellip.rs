//! Dziewonski-Gilbert ellipticity corrections.
//!
//! Each phase carries three tau profiles tabulated on an implicit
//! 5-degree distance grid and a fixed six-depth virtual grid. The axes of
//! the bilinear interpolation are abstracted behind [`GridAxis`] so evenly
//! spaced and explicit grids run through the same interpolator; the same
//! capability serves the topography sampler.

use enum_dispatch::enum_dispatch;
use ndarray::Array2;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

use crate::convert;
use crate::error::{Error, Result};
use crate::model::GEOCENTRIC_FACTOR;

/// The fixed virtual depth grid of the ellipticity tables, in kilometers.
pub const ELLIP_DEPTHS: [f64; 6] = [0.0, 100.0, 200.0, 300.0, 500.0, 700.0];

/// Spacing of the implicit ellipticity distance grid in degrees.
pub const ELLIP_DEL_STEP: f64 = 5.0;

/// One axis of a virtual 2-d grid.
#[enum_dispatch]
pub trait GridAxis {
    /// Lower bracketing index of `v`, or `None` outside the axis range.
    fn index_of(&self, v: f64) -> Option<usize>;
    /// Axis value at `i`.
    fn value_at(&self, i: usize) -> f64;
    /// Number of axis points.
    fn len(&self) -> usize;
}

/// An evenly spaced axis defined by its start and step.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EvenAxis {
    start: f64,
    step: f64,
    count: usize,
}

impl EvenAxis {
    /// Build an axis of `count` points starting at `start`.
    #[must_use]
    pub const fn new(start: f64, step: f64, count: usize) -> Self {
        Self { start, step, count }
    }
}

impl GridAxis for EvenAxis {
    fn index_of(&self, v: f64) -> Option<usize> {
        if self.count < 2 {
            return None;
        }
        let fi = (v - self.start) / self.step;
        if fi < 0.0 || fi > convert::f64_from_usize(self.count - 1) {
            return None;
        }
        Some(convert::usize_from_f64(fi).min(self.count - 2))
    }

    fn value_at(&self, i: usize) -> f64 {
        convert::f64_from_usize(i).mul_add(self.step, self.start)
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// An axis given by an explicit, strictly increasing value list.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExplicitAxis {
    values: Vec<f64>,
}

impl ExplicitAxis {
    /// Build an axis from explicit values.
    #[must_use]
    pub const fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// The standard six-depth ellipticity axis.
    #[must_use]
    pub fn ellip_depths() -> Self {
        Self::new(ELLIP_DEPTHS.to_vec())
    }
}

impl GridAxis for ExplicitAxis {
    fn index_of(&self, v: f64) -> Option<usize> {
        let n = self.values.len();
        if n < 2 || v < self.values[0] || v > self.values[n - 1] {
            return None;
        }
        Some(
            self.values
                .iter()
                .rposition(|&x| x <= v)
                .unwrap_or(0)
                .min(n - 2),
        )
    }

    fn value_at(&self, i: usize) -> f64 {
        self.values[i]
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

/// Axes accepted by the bilinear interpolator.
#[enum_dispatch(GridAxis)]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum AxisEnum {
    /// Evenly spaced (longitude, latitude, distance).
    EvenAxis,
    /// Explicit values (the virtual depth grid).
    ExplicitAxis,
}

/// Bilinear interpolation of `table[(row, col)]` over `(row_axis, col_axis)`.
#[must_use]
pub fn bilinear(
    row_axis: &AxisEnum,
    col_axis: &AxisEnum,
    table: &Array2<f64>,
    row_v: f64,
    col_v: f64,
) -> Option<f64> {
    let i = row_axis.index_of(row_v)?;
    let j = col_axis.index_of(col_v)?;
    let r0 = row_axis.value_at(i);
    let r1 = row_axis.value_at(i + 1);
    let c0 = col_axis.value_at(j);
    let c1 = col_axis.value_at(j + 1);
    let fr = ((row_v - r0) / (r1 - r0)).clamp(0.0, 1.0);
    let fc = ((col_v - c0) / (c1 - c0)).clamp(0.0, 1.0);
    let v00 = table[[i, j]];
    let v01 = table[[i, j + 1]];
    let v10 = table[[i + 1, j]];
    let v11 = table[[i + 1, j + 1]];
    Some(
        (1.0 - fr).mul_add(
            fc.mul_add(v01, (1.0 - fc) * v00),
            fr * fc.mul_add(v11, (1.0 - fc) * v10),
        ),
    )
}

/// The ellipticity tables of one phase.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EllipEntry {
    /// Smallest tabulated distance in degrees.
    pub delta_min: f64,
    /// Largest tabulated distance in degrees.
    pub delta_max: f64,
    dist_axis: AxisEnum,
    depth_axis: AxisEnum,
    t0: Array2<f64>,
    t1: Array2<f64>,
    t2: Array2<f64>,
}

impl EllipEntry {
    /// Build an entry from the three tau tables, each of shape
    /// `(n_distances, 6)`.
    #[must_use]
    pub fn new(delta_min: f64, delta_max: f64, t0: Array2<f64>, t1: Array2<f64>, t2: Array2<f64>) -> Self {
        let n = t0.nrows();
        Self {
            delta_min,
            delta_max,
            dist_axis: EvenAxis::new(delta_min, ELLIP_DEL_STEP, n).into(),
            depth_axis: ExplicitAxis::ellip_depths().into(),
            t0,
            t1,
            t2,
        }
    }

    fn taus(&self, delta: f64, depth: f64) -> Option<(f64, f64, f64)> {
        let depth = depth.clamp(ELLIP_DEPTHS[0], ELLIP_DEPTHS[5]);
        Some((
            bilinear(&self.dist_axis, &self.depth_axis, &self.t0, delta, depth)?,
            bilinear(&self.dist_axis, &self.depth_axis, &self.t1, delta, depth)?,
            bilinear(&self.dist_axis, &self.depth_axis, &self.t2, delta, depth)?,
        ))
    }
}

/// All ellipticity tables, keyed by phase code.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Ellipticity {
    phases: FxHashMap<String, EllipEntry>,
}

impl Ellipticity {
    /// Insert a phase entry.
    pub fn insert(&mut self, phase: String, entry: EllipEntry) {
        self.phases.insert(phase, entry);
    }

    /// Look up a phase entry.
    #[must_use]
    pub fn get(&self, phase: &str) -> Option<&EllipEntry> {
        self.phases.get(phase)
    }

    /// Ellipticity correction in seconds.
    ///
    /// `lat_deg` is the geographic source latitude, `azim_deg` the
    /// source-to-station azimuth. An unknown phase or a distance outside
    /// the tabulated window contributes no correction.
    #[must_use]
    pub fn correction(
        &self,
        phase: &str,
        lat_deg: f64,
        depth_km: f64,
        delta_deg: f64,
        azim_deg: f64,
    ) -> f64 {
        let Some(entry) = self.phases.get(phase) else {
            return 0.0;
        };
        let Some((t0, t1, t2)) = entry.taus(delta_deg, depth_km) else {
            return 0.0;
        };

        // Geocentric co-latitude of the source.
        let geocentric_lat = (GEOCENTRIC_FACTOR * lat_deg.to_radians().tan()).atan();
        let colat = std::f64::consts::FRAC_PI_2 - geocentric_lat;
        let azim = azim_deg.to_radians();

        let sc0 = 0.25 * 3.0_f64.mul_add((2.0 * colat).cos(), 1.0);
        let sc1 = 3.0_f64.sqrt() / 2.0 * (2.0 * colat).sin();
        let sc2 = 3.0_f64.sqrt() / 2.0 * colat.sin().powi(2);

        (sc2 * (2.0 * azim).cos()).mul_add(t2, (sc1 * azim.cos()).mul_add(t1, sc0 * t0))
    }

    /// Parse an ellipticity table file: per phase a header
    /// `code n_delta delta_min delta_max` followed by `n_delta` rows, each
    /// holding the distance and the three six-element tau vectors.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] on malformed headers or rows.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut out = Self::default();
        let mut lines = reader.lines();
        while let Some(line) = lines.next() {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() != 4 {
                return Err(Error::TableIntegrity(format!(
                    "bad ellipticity header: {line}"
                )));
            }
            let code = tokens[0].to_owned();
            let n_delta: usize = tokens[1]
                .parse()
                .map_err(|_| Error::TableIntegrity(format!("bad ellipticity count: {line}")))?;
            let delta_min: f64 = parse_f64(tokens[2])?;
            let delta_max: f64 = parse_f64(tokens[3])?;

            let mut t0 = Array2::zeros((n_delta, 6));
            let mut t1 = Array2::zeros((n_delta, 6));
            let mut t2 = Array2::zeros((n_delta, 6));
            for row in 0..n_delta {
                let line = lines
                    .next()
                    .ok_or_else(|| {
                        Error::TableIntegrity(format!("truncated ellipticity block for {code}"))
                    })??;
                let values: Vec<&str> = line.split_whitespace().collect();
                if values.len() != 19 {
                    return Err(Error::TableIntegrity(format!(
                        "bad ellipticity row for {code}: {line}"
                    )));
                }
                for col in 0..6 {
                    t0[[row, col]] = parse_f64(values[1 + col])?;
                    t1[[row, col]] = parse_f64(values[7 + col])?;
                    t2[[row, col]] = parse_f64(values[13 + col])?;
                }
            }
            out.insert(code, EllipEntry::new(delta_min, delta_max, t0, t1, t2));
        }
        Ok(out)
    }
}

fn parse_f64(token: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| Error::TableIntegrity(format!("bad number in ellipticity file: {token}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn one_phase(t0c: f64, t1c: f64, t2c: f64) -> Ellipticity {
        let mut out = Ellipticity::default();
        let n = 10;
        out.insert(
            "P".into(),
            EllipEntry::new(
                20.0,
                65.0,
                Array2::from_elem((n, 6), t0c),
                Array2::from_elem((n, 6), t1c),
                Array2::from_elem((n, 6), t2c),
            ),
        );
        out
    }

    #[test]
    fn zero_tables_give_zero_correction() {
        let ellip = one_phase(0.0, 0.0, 0.0);
        assert_approx_eq!(
            f64,
            ellip.correction("P", 0.0, 0.0, 45.0, 0.0),
            0.0,
            epsilon = f64::EPSILON
        );
    }

    #[test]
    fn unknown_phase_gives_zero() {
        let ellip = one_phase(1.0, 1.0, 1.0);
        assert_approx_eq!(f64, ellip.correction("XYZ", 10.0, 0.0, 45.0, 0.0), 0.0, epsilon = 0.0);
    }

    #[test]
    fn out_of_window_distance_gives_zero() {
        let ellip = one_phase(1.0, 1.0, 1.0);
        assert_approx_eq!(f64, ellip.correction("P", 10.0, 0.0, 100.0, 0.0), 0.0, epsilon = 0.0);
    }

    #[test]
    fn azimuth_is_periodic() {
        let ellip = one_phase(0.3, -0.2, 0.15);
        for az in [0.0, 37.0, 123.0, 275.0] {
            assert_approx_eq!(
                f64,
                ellip.correction("P", 35.0, 120.0, 40.0, az),
                ellip.correction("P", 35.0, 120.0, 40.0, az + 360.0),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn zonal_term_is_azimuth_independent() {
        let ellip = one_phase(0.5, 0.0, 0.0);
        let base = ellip.correction("P", -20.0, 50.0, 30.0, 0.0);
        for az in [45.0, 90.0, 200.0, 315.0] {
            assert_approx_eq!(
                f64,
                ellip.correction("P", -20.0, 50.0, 30.0, az),
                base,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn table_file_round_trip() {
        let mut text = String::from("P 3 20.0 30.0\n");
        for row in 0..3 {
            let delta = 5.0_f64.mul_add(f64::from(row), 20.0);
            text.push_str(&format!("{delta}"));
            for k in 0..18 {
                text.push_str(&format!(" {}", 0.01 * f64::from(k + row)));
            }
            text.push('\n');
        }
        let ellip = Ellipticity::from_reader(text.as_bytes()).unwrap();
        let entry = ellip.get("P").unwrap();
        assert_approx_eq!(f64, entry.delta_min, 20.0, epsilon = 0.0);
        assert!(ellip.correction("P", 0.0, 0.0, 25.0, 0.0).abs() > 0.0);
    }

    #[test]
    fn even_axis_bracketing() {
        let axis = EvenAxis::new(20.0, 5.0, 10);
        assert_eq!(axis.index_of(20.0), Some(0));
        assert_eq!(axis.index_of(32.5), Some(2));
        assert_eq!(axis.index_of(65.0), Some(8));
        assert_eq!(axis.index_of(19.9), None);
        assert_eq!(axis.index_of(65.1), None);
    }

    #[test]
    fn explicit_axis_bracketing() {
        let axis = ExplicitAxis::ellip_depths();
        assert_eq!(axis.index_of(0.0), Some(0));
        assert_eq!(axis.index_of(450.0), Some(3));
        assert_eq!(axis.index_of(700.0), Some(4));
        assert_eq!(axis.index_of(701.0), None);
    }
}
