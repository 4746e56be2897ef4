//! Normalized, earth-flattened model reference shared by the whole engine.
//!
//! The engine works throughout in the flattened representation: radii map to
//! log-depths `z = ln(x_norm * r)` (negative below the surface), velocities
//! to dimensionless slownesses. [`ModelConversions`] owns the normalization
//! constants and every dimensional round trip; [`ModelShell`] holds the
//! `(z, p)` depth samples of one wave type.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Geocentric flattening factor applied to geographic latitudes.
pub const GEOCENTRIC_FACTOR: f64 = 0.993305521;

/// Comparison tolerance for normalized slownesses and flattened depths.
pub const DTOL: f64 = 1e-9;

/// Wave type selecting one of the two model halves.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum WaveType {
    /// Compressional.
    P,
    /// Shear.
    S,
}

impl WaveType {
    /// Return the other wave type, used for converted-phase legs.
    #[must_use]
    pub const fn converted(self) -> Self {
        match self {
            Self::P => Self::S,
            Self::S => Self::P,
        }
    }
}

/// Normalization constants and unit conversions of one earth model.
///
/// Immutable for the lifetime of the model. All fields come from the first
/// record of the model header file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModelConversions {
    /// Distance normalization (1/km).
    pub x_norm: f64,
    /// Slowness normalization (s/km).
    pub p_norm: f64,
    /// Time normalization (s), equal to `1/(x_norm * p_norm)`.
    pub t_norm: f64,
    /// Velocity normalization `x_norm * p_norm` (dimensionless helper).
    pub v_norm: f64,
    /// Surface radius in kilometers.
    pub surface_radius: f64,
    /// Depth of the upper-mantle discontinuity in kilometers.
    pub upper_mantle_depth: f64,
    /// Depth of the Moho in kilometers.
    pub moho_depth: f64,
    /// Depth separating crustal from mantle phase conversions in kilometers.
    pub conversion_depth: f64,
    /// Depth of the inner-core boundary in kilometers.
    pub inner_core_depth: f64,
}

impl ModelConversions {
    /// Build the converter from the constants stored in the model header.
    #[must_use]
    pub fn new(x_norm: f64, p_norm: f64, t_norm: f64, surface_radius: f64) -> Self {
        Self {
            x_norm,
            p_norm,
            t_norm,
            v_norm: x_norm * p_norm,
            surface_radius,
            upper_mantle_depth: 410.0,
            moho_depth: 35.0,
            conversion_depth: 660.0,
            inner_core_depth: 5153.9,
        }
    }

    /// Flattened depth for a radius `r` in kilometers.
    #[must_use]
    pub fn flat_z(&self, r: f64) -> f64 {
        (self.x_norm * r).ln()
    }

    /// Radius in kilometers for a flattened depth.
    #[must_use]
    pub fn real_r(&self, z: f64) -> f64 {
        z.exp() / self.x_norm
    }

    /// Flattened depth for a depth below the surface in kilometers.
    #[must_use]
    pub fn flat_depth(&self, depth_km: f64) -> f64 {
        self.flat_z(self.surface_radius - depth_km)
    }

    /// Depth below the surface in kilometers for a flattened depth.
    #[must_use]
    pub fn real_depth(&self, z: f64) -> f64 {
        self.surface_radius - self.real_r(z)
    }

    /// Dimensional velocity in km/s at flattened depth `z` for a normalized
    /// slowness `p`.
    #[must_use]
    pub fn real_v(&self, p: f64, z: f64) -> f64 {
        z.exp() / (self.t_norm * p)
    }

    /// Normalized slowness for a dimensional velocity at radius `r`.
    #[must_use]
    pub fn flat_p(&self, v: f64, r: f64) -> f64 {
        self.v_norm * r / v
    }

    /// Conversion from a normalized ray parameter to `dT/dDelta` in s/deg.
    #[must_use]
    pub fn dtddelta(&self) -> f64 {
        std::f64::consts::PI / (180.0 * self.v_norm)
    }

    /// Conversion factor for the depth derivative at a source flattened
    /// depth, yielding s/km from a normalized vertical slowness.
    #[must_use]
    pub fn dtddepth(&self, z_source: f64) -> f64 {
        self.t_norm * self.x_norm * (-z_source).exp()
    }

    /// Kilometers per degree of arc at the surface.
    #[must_use]
    pub fn deg_to_km(&self) -> f64 {
        std::f64::consts::PI * self.surface_radius / 180.0
    }
}

/// One depth sample of a model shell.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ModelSample {
    /// Flattened depth, decreasing from the surface downward.
    pub z: f64,
    /// Normalized slowness at `z`.
    pub p: f64,
    /// Index of this sample in the up-going table depth list.
    pub up_index: usize,
}

/// The depth-sampled slowness profile of one wave type.
///
/// Samples are ordered from the surface downward (`z` strictly decreasing).
/// Slowness is non-increasing with depth except inside low-velocity zones.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModelShell {
    wave: WaveType,
    samples: Vec<ModelSample>,
}

/// Where a source depth falls in a shell, with the slowness bookkeeping the
/// up-going correction needs.
#[derive(Clone, Copy, Debug)]
pub struct SourcePosition {
    /// Index of the deepest sample at or above the source.
    pub index: usize,
    /// Flattened source depth.
    pub z_source: f64,
    /// Slowness at the source depth.
    pub p_source: f64,
    /// Shallowest slowness between the surface and the source. Equal to
    /// `p_source` except when the source sits inside a low-velocity zone,
    /// where it is the slowness at the top of the zone.
    pub p_max: f64,
    /// Index of the sample bounding the low-velocity zone from above, when
    /// `p_max != p_source`.
    pub lvz_top: Option<usize>,
}

impl ModelShell {
    /// Build a shell from surface-ordered samples.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] when fewer than two samples are
    /// given or the depths do not decrease.
    pub fn new(wave: WaveType, samples: Vec<ModelSample>) -> Result<Self> {
        if samples.len() < 2 {
            return Err(Error::TableIntegrity(format!(
                "{wave:?} shell has {} samples, needs at least 2",
                samples.len()
            )));
        }
        if samples.windows(2).any(|w| w[1].z >= w[0].z) {
            return Err(Error::TableIntegrity(format!(
                "{wave:?} shell depths do not decrease"
            )));
        }
        Ok(Self { wave, samples })
    }

    /// Wave type of this shell.
    #[must_use]
    pub const fn wave(&self) -> WaveType {
        self.wave
    }

    /// The depth samples, surface first.
    #[must_use]
    pub fn samples(&self) -> &[ModelSample] {
        &self.samples
    }

    /// Flattened depth of the deepest stored sample.
    #[must_use]
    pub fn deepest_z(&self) -> f64 {
        self.samples[self.samples.len() - 1].z
    }

    /// Exponential-profile slowness between the two bracketing samples.
    ///
    /// Within a layer the slowness follows `u(z) = b + (p_top - b) *
    /// exp(z - z_top)`, the same profile the tau integrator assumes.
    #[must_use]
    pub fn slowness_between(top: ModelSample, bot: ModelSample, z: f64) -> f64 {
        if (top.z - bot.z).abs() <= DTOL || (top.p - bot.p).abs() <= DTOL {
            return top.p;
        }
        let b = layer_b(top.p, top.z, bot.p, bot.z);
        (top.p - b).mul_add((z - top.z).exp(), b)
    }

    /// Locate a source depth and derive its slowness bookkeeping.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InputRange`] when `z_source` lies below the
    /// deepest stored sample.
    pub fn locate(&self, z_source: f64) -> Result<SourcePosition> {
        if z_source < self.deepest_z() - DTOL {
            return Err(Error::InputRange(format!(
                "source depth z={z_source:.6} below deepest {:?} sample {:.6}",
                self.wave,
                self.deepest_z()
            )));
        }
        let z_source = z_source.min(self.samples[0].z);

        // Deepest sample at or above the source.
        let mut index = 0;
        while index + 1 < self.samples.len() && self.samples[index + 1].z >= z_source - DTOL {
            index += 1;
        }

        let p_source = if (self.samples[index].z - z_source).abs() <= DTOL {
            self.samples[index].p
        } else {
            Self::slowness_between(self.samples[index], self.samples[index + 1], z_source)
        };

        // The shallowest slowness above the source bounds the rays that can
        // reach the surface. It differs from p_source only inside an LVZ.
        let mut p_max = p_source;
        let mut lvz_top = None;
        for (i, sample) in self.samples[..=index].iter().enumerate() {
            if sample.p < p_max - DTOL {
                p_max = sample.p;
                lvz_top = Some(i);
            }
        }
        if p_max >= p_source - DTOL {
            lvz_top = None;
            p_max = p_source;
        }

        Ok(SourcePosition {
            index,
            z_source,
            p_source,
            p_max,
            lvz_top,
        })
    }
}

/// Intercept `b` of the exponential slowness profile fitted through a layer.
#[must_use]
pub fn layer_b(p_top: f64, z_top: f64, p_bot: f64, z_bot: f64) -> f64 {
    p_top - (p_bot - p_top) / ((z_bot - z_top).exp_m1())
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn ak135ish() -> ModelConversions {
        ModelConversions::new(1.0 / 6371.0, 6371.0 / 8.04, 8.04, 6371.0)
    }

    #[test]
    fn normalization_round_trips() {
        let cvt = ak135ish();

        for r in [0.1, 1.0, 1219.9, 3479.5, 6371.0] {
            assert_approx_eq!(f64, cvt.real_r(cvt.flat_z(r)), r, epsilon = 1e-9);
        }
        for (p, z) in [(0.1, 0.0), (0.5, -0.3), (1.0, -1.2)] {
            let v = cvt.real_v(p, z);
            let r = cvt.real_r(z);
            assert_approx_eq!(f64, cvt.flat_p(v, r), p, epsilon = 1e-9);
        }
    }

    #[test]
    fn depth_round_trips() {
        let cvt = ak135ish();
        for depth in [0.0, 12.0, 509.98, 700.0] {
            assert_approx_eq!(
                f64,
                cvt.real_depth(cvt.flat_depth(depth)),
                depth,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn dtddelta_matches_time_normalization() {
        // t = t_norm * (tau + p * x) implies dT/dDelta[s/deg] =
        // t_norm * p * pi/180, so the published factor requires
        // t_norm = 1/v_norm.
        let cvt = ak135ish();
        assert_approx_eq!(
            f64,
            cvt.dtddelta(),
            cvt.t_norm * std::f64::consts::PI / 180.0,
            epsilon = 1e-12
        );
    }

    fn sample(z: f64, p: f64) -> ModelSample {
        ModelSample { z, p, up_index: 0 }
    }

    #[test]
    fn locate_interpolates_slowness() {
        let shell = ModelShell::new(
            WaveType::P,
            vec![sample(0.0, 1.0), sample(-0.5, 0.8), sample(-1.0, 0.6)],
        )
        .unwrap();

        let on_sample = shell.locate(-0.5).unwrap();
        assert_eq!(on_sample.index, 1);
        assert_approx_eq!(f64, on_sample.p_source, 0.8, epsilon = 1e-12);
        assert!(on_sample.lvz_top.is_none());
        assert_approx_eq!(f64, on_sample.p_max, 0.8, epsilon = 1e-12);

        let between = shell.locate(-0.25).unwrap();
        assert_eq!(between.index, 0);
        assert!(between.p_source < 1.0 && between.p_source > 0.8);
    }

    #[test]
    fn locate_flags_low_velocity_zone() {
        // Slowness increases again below -0.5: an LVZ. A source inside it
        // sees p_max capped by the zone top.
        let shell = ModelShell::new(
            WaveType::S,
            vec![
                sample(0.0, 1.0),
                sample(-0.5, 0.7),
                sample(-0.8, 0.9),
                sample(-1.2, 0.6),
            ],
        )
        .unwrap();

        let inside = shell.locate(-0.8).unwrap();
        assert_approx_eq!(f64, inside.p_source, 0.9, epsilon = 1e-12);
        assert_approx_eq!(f64, inside.p_max, 0.7, epsilon = 1e-12);
        assert_eq!(inside.lvz_top, Some(1));
    }

    #[test]
    fn locate_rejects_depth_below_table() {
        let shell =
            ModelShell::new(WaveType::P, vec![sample(0.0, 1.0), sample(-1.0, 0.6)]).unwrap();
        assert!(matches!(
            shell.locate(-1.5),
            Err(crate::error::Error::InputRange(_))
        ));
    }

    #[test]
    fn layer_b_reproduces_endpoints() {
        let (p_top, z_top, p_bot, z_bot) = (1.0, -0.2, 0.7, -0.9);
        let b = layer_b(p_top, z_top, p_bot, z_bot);
        let u = |z: f64| (p_top - b).mul_add((z - z_top).exp(), b);
        assert_approx_eq!(f64, u(z_top), p_top, epsilon = 1e-12);
        assert_approx_eq!(f64, u(z_bot), p_bot, epsilon = 1e-12);
    }
}
