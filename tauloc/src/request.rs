//! JSON-shaped service façade types and their conversion to the internal
//! event model.
//!
//! The outer location iteration lives elsewhere; these types only carry the
//! request and result shapes across the process boundary. Times on the
//! wire are epoch milliseconds; internally everything is epoch seconds.

use serde::{Deserialize, Serialize};

use crate::convert;
use crate::error::{Error, Result};
use crate::event::{AuthorType, Event, Hypocenter, Pick, Station};

/// One pick of a location request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PickInput {
    /// Database identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Station code.
    #[serde(rename = "Station")]
    pub station: String,
    /// Channel code.
    #[serde(rename = "Channel")]
    pub channel: String,
    /// Network code.
    #[serde(rename = "Network")]
    pub network: String,
    /// Location code.
    #[serde(rename = "Location")]
    pub location: String,
    /// Station geographic latitude in degrees.
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    /// Station longitude in degrees.
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    /// Station elevation in meters.
    #[serde(rename = "Elevation")]
    pub elevation: f64,
    /// Author type code, 1 through 4.
    #[serde(rename = "Source")]
    pub source: u8,
    /// Arrival time in epoch milliseconds.
    #[serde(rename = "Time")]
    pub time: f64,
    /// Re-identification resistance weight; zero requests the default.
    #[serde(rename = "Affinity")]
    pub affinity: f64,
    /// Pick quality.
    #[serde(rename = "Quality")]
    pub quality: f64,
    /// Whether the pick may be used.
    #[serde(rename = "Use")]
    pub use_flag: bool,
    /// Phase assigned by the picker.
    #[serde(rename = "PickedPhase")]
    pub picked_phase: String,
    /// Phase of the current association.
    #[serde(rename = "AssociatedPhase")]
    pub associated_phase: String,
    /// Residual in seconds (output).
    #[serde(rename = "Residual", default)]
    pub residual: Option<f64>,
    /// Epicentral distance in degrees (output).
    #[serde(rename = "Distance", default)]
    pub distance: Option<f64>,
    /// Azimuth in degrees (output).
    #[serde(rename = "Azimuth", default)]
    pub azimuth: Option<f64>,
    /// Relative weight (output).
    #[serde(rename = "Weight", default)]
    pub weight: Option<f64>,
    /// Data importance (output).
    #[serde(rename = "Importance", default)]
    pub importance: Option<f64>,
}

/// A location request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LocationRequest {
    /// Source geographic latitude in degrees.
    #[serde(rename = "SourceLatitude")]
    pub source_latitude: f64,
    /// Source longitude in degrees.
    #[serde(rename = "SourceLongitude")]
    pub source_longitude: f64,
    /// Source depth in kilometers.
    #[serde(rename = "SourceDepth")]
    pub source_depth: f64,
    /// Origin time in epoch milliseconds.
    #[serde(rename = "SourceOriginTime")]
    pub source_origin_time: f64,
    /// The starting location is new rather than refined.
    #[serde(rename = "IsLocationNew", default)]
    pub is_location_new: bool,
    /// The epicenter may not move.
    #[serde(rename = "IsLocationHeld", default)]
    pub is_location_held: bool,
    /// The depth may not move.
    #[serde(rename = "IsDepthHeld", default)]
    pub is_depth_held: bool,
    /// A Bayesian depth prior applies.
    #[serde(rename = "IsBayesianDepth", default)]
    pub is_bayesian_depth: bool,
    /// Bayesian depth prior mean in kilometers.
    #[serde(rename = "BayesianDepth", default)]
    pub bayesian_depth: f64,
    /// Bayesian depth prior spread in kilometers.
    #[serde(rename = "BayesianSpread", default)]
    pub bayesian_spread: f64,
    /// Allow the decomposition in the outer locator.
    #[serde(rename = "UseSVD", default)]
    pub use_svd: bool,
    /// The picks.
    #[serde(rename = "InputData")]
    pub input_data: Vec<PickInput>,
}

impl LocationRequest {
    /// Convert the request into the internal event model.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] on an unknown author code.
    pub fn to_event(&self) -> Result<Event> {
        let mut picks = Vec::with_capacity(self.input_data.len());
        for input in &self.input_data {
            let author = AuthorType::from_code(input.source).ok_or_else(|| {
                Error::TableIntegrity(format!("bad author code {}", input.source))
            })?;
            picks.push(Pick {
                db_id: input.id.clone(),
                station: Station {
                    code: input.station.clone(),
                    network: input.network.clone(),
                    location: input.location.clone(),
                    lat: input.latitude,
                    lon: input.longitude,
                    elev: input.elevation / 1000.0,
                },
                channel: input.channel.clone(),
                arrival_time: input.time / 1000.0,
                quality: input.quality,
                use_flag: input.use_flag,
                observed_phase: input.picked_phase.clone(),
                current_phase: input.associated_phase.clone(),
                author,
                affinity: Pick::resolve_affinity(author, input.affinity),
                delta: 0.0,
                azimuth: 0.0,
                residual: None,
                travel_time: None,
                fom: None,
            });
        }

        let mut event = Event {
            hypo: Hypocenter {
                origin_time: self.source_origin_time / 1000.0,
                lat: self.source_latitude,
                lon: self.source_longitude,
                depth: self.source_depth,
                held_location: self.is_location_held,
                held_depth: self.is_depth_held,
                analyst_depth: self.is_bayesian_depth,
                bayesian_depth: self.bayesian_depth,
                bayesian_spread: self.bayesian_spread,
                rstt: false,
                no_svd: !self.use_svd,
            },
            picks,
        };
        event.update(true);
        event.sort_picks();
        Ok(event)
    }
}

/// Hypocenter fields of a location result.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResultHypocenter {
    /// Geographic latitude in degrees.
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(rename = "Longitude")]
    pub longitude: f64,
    /// Depth in kilometers.
    #[serde(rename = "Depth")]
    pub depth: f64,
    /// Origin time in epoch milliseconds.
    #[serde(rename = "Time")]
    pub time: f64,
}

/// Summary of a refined event, reported back across the façade.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LocationResult {
    /// Refined hypocenter.
    #[serde(rename = "Hypocenter")]
    pub hypocenter: ResultHypocenter,
    /// Root-mean-square residual of the used picks in seconds.
    #[serde(rename = "RMS")]
    pub rms: f64,
    /// Largest azimuthal gap in degrees.
    #[serde(rename = "Gap")]
    pub gap: f64,
    /// Smallest used distance in degrees.
    #[serde(rename = "MinimumDistance")]
    pub minimum_distance: f64,
    /// Number of stations with used picks.
    #[serde(rename = "NumberOfUsedStations")]
    pub used_stations: usize,
    /// Number of used picks.
    #[serde(rename = "NumberOfUsedPhases")]
    pub used_phases: usize,
    /// Letter quality of the solution.
    #[serde(rename = "Quality")]
    pub quality: String,
}

impl LocationResult {
    /// Summarize an identified event.
    #[must_use]
    pub fn summarize(event: &Event) -> Self {
        let rms = {
            let residuals: Vec<f64> = event
                .picks
                .iter()
                .filter(|p| p.use_flag)
                .filter_map(|p| p.residual)
                .collect();
            if residuals.is_empty() {
                0.0
            } else {
                (residuals.iter().map(|r| r * r).sum::<f64>()
                    / convert::f64_from_usize(residuals.len()))
                .sqrt()
            }
        };
        let gap = azimuthal_gap(
            &event
                .picks
                .iter()
                .filter(|p| p.use_flag)
                .map(|p| p.azimuth)
                .collect::<Vec<_>>(),
        );
        let used_stations = event.used_station_count();
        let used_phases = event.used_count();
        let quality = if gap < 110.0 && used_phases >= 10 {
            "A"
        } else if gap < 180.0 && used_phases >= 6 {
            "B"
        } else if used_phases >= 4 {
            "C"
        } else {
            "D"
        };
        Self {
            hypocenter: ResultHypocenter {
                latitude: event.hypo.lat,
                longitude: event.hypo.lon,
                depth: event.hypo.depth,
                time: event.hypo.origin_time * 1000.0,
            },
            rms,
            gap,
            minimum_distance: event.minimum_distance().unwrap_or(0.0),
            used_stations,
            used_phases,
            quality: quality.to_owned(),
        }
    }
}

/// Largest gap between consecutive azimuths in degrees.
fn azimuthal_gap(azimuths: &[f64]) -> f64 {
    if azimuths.is_empty() {
        return 360.0;
    }
    let mut sorted = azimuths.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut gap = 360.0 - (sorted[sorted.len() - 1] - sorted[0]);
    for pair in sorted.windows(2) {
        gap = gap.max(pair[1] - pair[0]);
    }
    gap
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    const REQUEST_JSON: &str = r#"{
        "SourceLatitude": 50.2075,
        "SourceLongitude": -114.8603,
        "SourceDepth": 509.98,
        "SourceOriginTime": 1217617551880.0,
        "IsLocationHeld": false,
        "IsDepthHeld": false,
        "UseSVD": true,
        "InputData": [
            {
                "ID": "10563",
                "Station": "ST01",
                "Channel": "BHZ",
                "Network": "US",
                "Location": "00",
                "Latitude": 49.0,
                "Longitude": -113.0,
                "Elevation": 1100.0,
                "Source": 1,
                "Time": 1217617601500.0,
                "Affinity": 0.0,
                "Quality": 0.9,
                "Use": true,
                "PickedPhase": "P",
                "AssociatedPhase": "P"
            }
        ]
    }"#;

    #[test]
    fn request_round_trips_through_serde() {
        let request: LocationRequest = serde_json::from_str(REQUEST_JSON).unwrap();
        assert_approx_eq!(f64, request.source_depth, 509.98, epsilon = 1e-9);
        assert_eq!(request.input_data.len(), 1);
        let text = serde_json::to_string(&request).unwrap();
        let again: LocationRequest = serde_json::from_str(&text).unwrap();
        assert_approx_eq!(
            f64,
            again.source_origin_time,
            request.source_origin_time,
            epsilon = 0.0
        );
    }

    #[test]
    fn conversion_scales_times_and_elevations() {
        let request: LocationRequest = serde_json::from_str(REQUEST_JSON).unwrap();
        let event = request.to_event().unwrap();
        assert_approx_eq!(f64, event.hypo.origin_time, 1217617551.880, epsilon = 1e-6);
        let pick = &event.picks[0];
        assert_approx_eq!(f64, pick.arrival_time, 1217617601.5, epsilon = 1e-6);
        assert_approx_eq!(f64, pick.station.elev, 1.1, epsilon = 1e-9);
        assert_approx_eq!(f64, pick.affinity, 1.0, epsilon = 0.0);
        assert!(pick.delta > 0.0);
    }

    #[test]
    fn summary_counts_and_gap() {
        let request: LocationRequest = serde_json::from_str(REQUEST_JSON).unwrap();
        let event = request.to_event().unwrap();
        let result = LocationResult::summarize(&event);
        assert_eq!(result.used_phases, 1);
        assert_eq!(result.used_stations, 1);
        assert_eq!(result.quality, "D");
        assert_approx_eq!(f64, result.gap, 360.0, epsilon = 1e-9);
        assert_approx_eq!(
            f64,
            result.hypocenter.time,
            1217617551880.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn azimuthal_gap_finds_the_largest_hole() {
        assert_approx_eq!(
            f64,
            azimuthal_gap(&[0.0, 90.0, 180.0, 270.0]),
            90.0,
            epsilon = 1e-12
        );
        assert_approx_eq!(f64, azimuthal_gap(&[10.0, 20.0]), 350.0, epsilon = 1e-12);
        assert_approx_eq!(f64, azimuthal_gap(&[]), 360.0, epsilon = 0.0);
    }
}
