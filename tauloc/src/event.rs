//! Event-side data: hypocenter, stations, picks, and their housekeeping.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geo::{GeoPoint, compute_delta_azimuth};

/// Origin of a pick, encoded in the input as codes 1 through 4.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AuthorType {
    /// Automatic pick from a non-local network.
    AutomaticNonLocal,
    /// Automatic pick from the local network.
    AutomaticLocal,
    /// Analyst pick from a non-local network.
    AnalystNonLocal,
    /// Analyst pick from the local network.
    AnalystLocal,
}

impl AuthorType {
    /// Decode an author code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::AutomaticNonLocal),
            2 => Some(Self::AutomaticLocal),
            3 => Some(Self::AnalystNonLocal),
            4 => Some(Self::AnalystLocal),
            _ => None,
        }
    }

    /// Default affinity of picks from this author type.
    #[must_use]
    pub const fn default_affinity(self) -> f64 {
        match self {
            Self::AutomaticNonLocal | Self::AutomaticLocal => 1.0,
            Self::AnalystNonLocal => 1.5,
            Self::AnalystLocal => 3.0,
        }
    }

    /// True for machine-made picks.
    #[must_use]
    pub const fn is_automatic(self) -> bool {
        matches!(self, Self::AutomaticNonLocal | Self::AutomaticLocal)
    }
}

/// A recording site.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Station {
    /// Station code.
    pub code: String,
    /// Network code.
    pub network: String,
    /// Location code.
    pub location: String,
    /// Geographic latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Elevation in kilometers.
    pub elev: f64,
}

/// The working hypocenter of an event.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Hypocenter {
    /// Origin time in epoch seconds.
    pub origin_time: f64,
    /// Geographic latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Depth in kilometers.
    pub depth: f64,
    /// The epicenter may not move.
    pub held_location: bool,
    /// The depth may not move.
    pub held_depth: bool,
    /// The held depth came from an analyst.
    pub analyst_depth: bool,
    /// Bayesian depth prior mean in kilometers.
    pub bayesian_depth: f64,
    /// Bayesian depth prior spread in kilometers.
    pub bayesian_spread: f64,
    /// Regional travel-time model requested.
    pub rstt: bool,
    /// Decomposition disabled in the outer locator.
    pub no_svd: bool,
}

impl Hypocenter {
    /// Epicenter as a geographic point.
    #[must_use]
    pub const fn epicenter(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// One observed arrival-time pick.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Pick {
    /// Database identifier.
    pub db_id: String,
    /// Recording site.
    pub station: Station,
    /// Channel code.
    pub channel: String,
    /// Arrival time in epoch seconds.
    pub arrival_time: f64,
    /// Pick quality in the 0 to 1 range.
    pub quality: f64,
    /// Whether the pick may be used.
    pub use_flag: bool,
    /// Phase name assigned by the original picker.
    pub observed_phase: String,
    /// Phase name of the current identification.
    pub current_phase: String,
    /// Author type of the pick.
    pub author: AuthorType,
    /// Re-identification resistance weight.
    pub affinity: f64,
    /// Epicentral distance in degrees, maintained by `update`.
    pub delta: f64,
    /// Source-to-station azimuth in degrees, maintained by `update`.
    pub azimuth: f64,
    /// Residual in seconds against the current identification.
    pub residual: Option<f64>,
    /// Theoretical travel time of the current identification.
    pub travel_time: Option<f64>,
    /// Figure of merit of the current identification.
    pub fom: Option<f64>,
}

impl Pick {
    /// Resolve the affinity: explicit positive values win, otherwise the
    /// author-type default applies.
    #[must_use]
    pub fn resolve_affinity(author: AuthorType, affinity: f64) -> f64 {
        if affinity > 0.0 {
            affinity
        } else {
            author.default_affinity()
        }
    }
}

/// An event: one hypocenter and its picks.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Event {
    /// Working hypocenter.
    pub hypo: Hypocenter,
    /// All picks, sorted by arrival time after `sort_picks`.
    pub picks: Vec<Pick>,
}

fn parse_flag(token: &str) -> Result<bool> {
    match token {
        "T" | "t" => Ok(true),
        "F" | "f" => Ok(false),
        other => Err(Error::TableIntegrity(format!(
            "bad flag in event input: {other}"
        ))),
    }
}

fn parse_num(token: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| Error::TableIntegrity(format!("bad number in event input: {token}")))
}

impl Event {
    /// Parse the whitespace-separated event format: one hypocenter line
    /// followed by one line per pick.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] on malformed records.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader
            .lines()
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|l| !l.trim().is_empty());

        let hypo_line = lines
            .next()
            .ok_or_else(|| Error::TableIntegrity("empty event input".into()))?;
        let t: Vec<&str> = hypo_line.split_whitespace().collect();
        if t.len() != 11 {
            return Err(Error::TableIntegrity(format!(
                "hypocenter record has {} fields, expected 11",
                t.len()
            )));
        }
        let hypo = Hypocenter {
            origin_time: parse_num(t[0])?,
            lat: parse_num(t[1])?,
            lon: parse_num(t[2])?,
            depth: parse_num(t[3])?,
            held_location: parse_flag(t[4])?,
            held_depth: parse_flag(t[5])?,
            analyst_depth: parse_flag(t[6])?,
            bayesian_depth: parse_num(t[7])?,
            bayesian_spread: parse_num(t[8])?,
            rstt: parse_flag(t[9])?,
            no_svd: parse_flag(t[10])?,
        };

        let mut picks = Vec::new();
        for line in lines {
            let t: Vec<&str> = line.split_whitespace().collect();
            if t.len() != 15 {
                return Err(Error::TableIntegrity(format!(
                    "pick record has {} fields, expected 15",
                    t.len()
                )));
            }
            let author = AuthorType::from_code(
                t[12]
                    .parse::<u8>()
                    .map_err(|_| Error::TableIntegrity(format!("bad author code: {}", t[12])))?,
            )
            .ok_or_else(|| Error::TableIntegrity(format!("bad author code: {}", t[12])))?;
            let affinity = parse_num(t[14])?;
            picks.push(Pick {
                db_id: t[0].to_owned(),
                station: Station {
                    code: t[1].to_owned(),
                    network: t[3].to_owned(),
                    location: t[4].to_owned(),
                    lat: parse_num(t[5])?,
                    lon: parse_num(t[6])?,
                    elev: parse_num(t[7])?,
                },
                channel: t[2].to_owned(),
                quality: parse_num(t[8])?,
                current_phase: t[9].to_owned(),
                arrival_time: parse_num(t[10])?,
                use_flag: parse_flag(t[11])?,
                observed_phase: if t[13] == "-" {
                    String::new()
                } else {
                    t[13].to_owned()
                },
                author,
                affinity: Pick::resolve_affinity(author, affinity),
                delta: 0.0,
                azimuth: 0.0,
                residual: None,
                travel_time: None,
                fom: None,
            });
        }

        let mut event = Self { hypo, picks };
        event.update(true);
        event.sort_picks();
        Ok(event)
    }

    /// Sort picks by arrival time.
    pub fn sort_picks(&mut self) {
        self.picks
            .sort_by(|a, b| a.arrival_time.partial_cmp(&b.arrival_time).unwrap());
    }

    /// Refresh the distance and azimuth of picks against the current
    /// hypocenter. With `all` set every pick is refreshed, otherwise only
    /// the used ones. Returns the number of picks touched.
    ///
    /// The legacy implementation sized the `all` pass from the full pick
    /// list but then iterated the used subset; this version iterates the
    /// same set it counts.
    pub fn update(&mut self, all: bool) -> usize {
        if all {
            debug!("updating all picks (legacy sized this pass from the full list only)");
        }
        let epicenter = self.hypo.epicenter();
        let mut touched = 0;
        for pick in self
            .picks
            .iter_mut()
            .filter(|p| all || p.use_flag)
        {
            let da = compute_delta_azimuth(
                epicenter,
                GeoPoint {
                    lat: pick.station.lat,
                    lon: pick.station.lon,
                },
            );
            pick.delta = da.delta;
            pick.azimuth = da.azimuth;
            touched += 1;
        }
        touched
    }

    /// Number of picks currently usable.
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.picks.iter().filter(|p| p.use_flag).count()
    }

    /// Number of distinct stations with at least one used pick.
    #[must_use]
    pub fn used_station_count(&self) -> usize {
        self.picks
            .iter()
            .filter(|p| p.use_flag)
            .map(|p| (p.station.network.as_str(), p.station.code.as_str()))
            .unique()
            .count()
    }

    /// Smallest used distance in degrees, when any pick is used.
    #[must_use]
    pub fn minimum_distance(&self) -> Option<f64> {
        self.picks
            .iter()
            .filter(|p| p.use_flag)
            .map(|p| p.delta)
            .min_by(|a, b| a.partial_cmp(b).unwrap())
    }
}
