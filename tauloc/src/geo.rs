//! Spherical geometry between hypocenters and stations.
//!
//! Distances and azimuths are computed on the geocentric sphere: geographic
//! latitudes are corrected with the standard flattening factor before any
//! trigonometry. The result is returned in an explicit struct; nothing is
//! cached in globals.

use crate::model::GEOCENTRIC_FACTOR;
use serde::{Deserialize, Serialize};

/// Geographic coordinates in degrees.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct GeoPoint {
    /// Geographic latitude, positive north.
    pub lat: f64,
    /// Longitude, positive east.
    pub lon: f64,
}

/// Distance and azimuth from a source to a receiver.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct DeltaAzimuth {
    /// Epicentral distance in degrees.
    pub delta: f64,
    /// Azimuth from the source in degrees east of north, in `[0, 360)`.
    pub azimuth: f64,
}

/// Geocentric co-latitude in radians for a geographic latitude in degrees.
#[must_use]
pub fn geocentric_colat(lat_deg: f64) -> f64 {
    let geocentric = (GEOCENTRIC_FACTOR * lat_deg.to_radians().tan()).atan();
    std::f64::consts::FRAC_PI_2 - geocentric
}

/// Compute the epicentral distance and source-to-receiver azimuth.
#[must_use]
pub fn compute_delta_azimuth(source: GeoPoint, receiver: GeoPoint) -> DeltaAzimuth {
    let colat_s = geocentric_colat(source.lat);
    let colat_r = geocentric_colat(receiver.lat);
    let dlon = (receiver.lon - source.lon).to_radians();

    let cos_delta = colat_s
        .cos()
        .mul_add(colat_r.cos(), colat_s.sin() * colat_r.sin() * dlon.cos());
    let delta = cos_delta.clamp(-1.0, 1.0).acos().to_degrees();

    let y = dlon.sin() * colat_r.sin();
    let x = colat_r.cos().mul_add(
        colat_s.sin(),
        -(colat_r.sin() * colat_s.cos() * dlon.cos()),
    );
    let mut azimuth = y.atan2(x).to_degrees();
    if azimuth < 0.0 {
        azimuth += 360.0;
    }
    DeltaAzimuth { delta, azimuth }
}
