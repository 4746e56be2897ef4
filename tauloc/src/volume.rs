//! The travel-time volume: owner of all reference data, and the per-request
//! session that owns every piece of volatile state.
//!
//! Reference data (model shells, up-going tables, branch references,
//! auxiliary tables) never changes after load and can be shared read-only
//! between volumes; a [`TravelTimeSession`] borrows it and owns the
//! depth-corrected branches, so concurrent requests either hold separate
//! sessions or serialize on one.

use tracing::debug;

use crate::auxiliary::AuxTtRef;
use crate::branch::{Arrival, BranchRef, BranchVolatile, DistanceRep, QueryContext};
use crate::error::Result;
use crate::geo::GeoPoint;
use crate::model::{ModelConversions, ModelShell, WaveType};
use crate::phase::PhaseFlags;
use crate::upgoing::{UpGoingRef, UpGoingSession};

/// Default decimation target for the up-going grids, in radians.
const DEFAULT_X_MIN: f64 = 0.005;

/// Options of one session.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Decimation spacing target for deep-source up-going grids.
    pub x_min: f64,
    /// Epicenter, used for the bounce-point water depth of `pwP`.
    pub epicenter: Option<GeoPoint>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            x_min: DEFAULT_X_MIN,
            epicenter: None,
        }
    }
}

/// The immutable travel-time volume of one earth model.
#[derive(Clone, Debug)]
pub struct TravelTimeVolume {
    cvt: ModelConversions,
    p_shell: ModelShell,
    s_shell: ModelShell,
    p_up: UpGoingRef,
    s_up: UpGoingRef,
    branches: Vec<BranchRef>,
}

impl TravelTimeVolume {
    /// Assemble a volume from its parts.
    #[must_use]
    pub const fn new(
        cvt: ModelConversions,
        p_shell: ModelShell,
        s_shell: ModelShell,
        p_up: UpGoingRef,
        s_up: UpGoingRef,
        branches: Vec<BranchRef>,
    ) -> Self {
        Self {
            cvt,
            p_shell,
            s_shell,
            p_up,
            s_up,
            branches,
        }
    }

    /// The model converter.
    #[must_use]
    pub const fn conversions(&self) -> &ModelConversions {
        &self.cvt
    }

    /// The branch references.
    #[must_use]
    pub fn branches(&self) -> &[BranchRef] {
        &self.branches
    }

    /// Open a session for one source depth: correct both up-going tables
    /// and every branch.
    ///
    /// # Errors
    ///
    /// [`crate::error::Error::InputRange`] when the depth is below the
    /// deepest table sample; numerical and integrity failures propagate.
    pub fn new_session<'a>(
        &'a self,
        aux: Option<&'a AuxTtRef>,
        depth_km: f64,
        options: SessionOptions,
    ) -> Result<TravelTimeSession<'a>> {
        let p_session =
            self.p_up
                .new_session(&self.p_shell, &self.s_shell, &self.cvt, depth_km, options.x_min)?;
        let s_session =
            self.s_up
                .new_session(&self.s_shell, &self.p_shell, &self.cvt, depth_km, options.x_min)?;

        let mut volatiles = Vec::with_capacity(self.branches.len());
        for branch in &self.branches {
            volatiles.push(branch.correct(&p_session, &s_session)?);
        }

        let water_depth_km = match (aux.and_then(|a| a.topography.as_ref()), options.epicenter) {
            (Some(topo), Some(epi)) => topo.water_depth(epi.lat, epi.lon),
            _ => 0.0,
        };

        debug!(
            depth_km,
            branches = volatiles.iter().filter(|v| v.exists).count(),
            "session corrected"
        );

        Ok(TravelTimeSession {
            volume: self,
            aux,
            depth_km,
            dtddepth: self.cvt.dtddepth(p_session.z_source),
            water_depth_km,
            epicenter: options.epicenter,
            p_session,
            s_session,
            volatiles,
        })
    }
}

/// A per-request session holding the depth-corrected state.
#[derive(Clone, Debug)]
pub struct TravelTimeSession<'a> {
    volume: &'a TravelTimeVolume,
    aux: Option<&'a AuxTtRef>,
    depth_km: f64,
    dtddepth: f64,
    water_depth_km: f64,
    epicenter: Option<GeoPoint>,
    p_session: UpGoingSession,
    s_session: UpGoingSession,
    volatiles: Vec<BranchVolatile>,
}

impl TravelTimeSession<'_> {
    /// Source depth of this session in kilometers.
    #[must_use]
    pub const fn depth_km(&self) -> f64 {
        self.depth_km
    }

    /// The corrected up-going table of one wave type.
    #[must_use]
    pub const fn up_going(&self, wave: WaveType) -> &UpGoingSession {
        match wave {
            WaveType::P => &self.p_session,
            WaveType::S => &self.s_session,
        }
    }

    /// The corrected branch states, aligned with the volume's branches.
    #[must_use]
    pub fn corrected(&self) -> &[BranchVolatile] {
        &self.volatiles
    }

    /// All theoretical arrivals at an epicentral distance.
    ///
    /// Walks the three distance representations over every corrected
    /// branch, attaches statistics and flags, applies the per-phase bias,
    /// drops unusable phases unless `all_phases` is set, and sorts by time.
    #[must_use]
    pub fn get_tt(&self, delta_deg: f64, all_phases: bool) -> Vec<Arrival> {
        let ctx = QueryContext {
            cvt: &self.volume.cvt,
            depth_km: self.depth_km,
            dtddepth: self.dtddepth,
            water_depth_km: self.water_depth_km,
        };
        let x = delta_deg.to_radians();

        let mut arrivals = Vec::new();
        for (branch, volatile) in self.volume.branches.iter().zip(&self.volatiles) {
            for (rep, xs) in DistanceRep::all(x) {
                volatile.get_tt(branch, &ctx, rep, xs, &mut arrivals);
            }
        }

        if let Some(aux) = self.aux {
            for arrival in &mut arrivals {
                arrival.spread = aux.stats.spread(&arrival.phase, delta_deg);
                arrival.observability = aux.stats.observability(&arrival.phase, delta_deg);
                arrival.time += aux.stats.bias(&arrival.phase, delta_deg);
                arrival.flags = aux.groups.flags(&arrival.phase);
            }
            if !all_phases {
                arrivals.retain(|a| a.flags.contains(PhaseFlags::CAN_USE));
            }
        }

        arrivals.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
        arrivals
    }

    /// Arrivals with the ellipticity correction for one receiver geometry
    /// folded into the travel time.
    #[must_use]
    pub fn get_tt_at_azimuth(
        &self,
        delta_deg: f64,
        azimuth_deg: f64,
        all_phases: bool,
    ) -> Vec<Arrival> {
        let mut arrivals = self.get_tt(delta_deg, all_phases);
        if let (Some(aux), Some(epi)) = (self.aux, self.epicenter) {
            for arrival in &mut arrivals {
                arrival.time += aux.ellipticity.correction(
                    &arrival.phase,
                    epi.lat,
                    self.depth_km,
                    delta_deg,
                    azimuth_deg,
                );
            }
        }
        arrivals
    }
}
