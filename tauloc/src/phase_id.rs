//! Figure-of-merit phase identification.
//!
//! Every used pick is scored against every theoretical arrival at its
//! distance. The score is a residual probability times a theoretical
//! amplitude that encodes the group, type, affinity, and stickiness rules;
//! the best pair re-identifies the pick and sets its residual.

use tracing::debug;

use crate::branch::Arrival;
use crate::event::{Event, Pick};
use crate::phase::{PhaseDesc, PhaseFlags, PhaseGroups};
use crate::stats::DEF_SPREAD;
use crate::volume::TravelTimeSession;

/// Amplitude multiplier when the observed and theoretical phases share a
/// group (or its complementary group).
pub const GROUP_WEIGHT: f64 = 0.5;
/// Amplitude multiplier for a cross-group identification.
pub const OTHER_WEIGHT: f64 = 0.05;
/// Extra multiplier when an analyst pick changes wave type.
pub const TYPE_WEIGHT: f64 = 0.1;
/// Affinity assigned when the codes do not match exactly.
pub const NULL_AFFINITY: f64 = 1.0;
/// Amplitude multiplier preserving the previous identification.
pub const STICKY_WEIGHT: f64 = 1.5;
/// Observability penalty for down-weighted theoretical phases.
const DOWN_WEIGHT_FACTOR: f64 = 0.5;

/// Observed phase codes treated as generic first-arrival labels.
fn is_generic(code: &str) -> bool {
    code.is_empty() || code == "P" || code == "S"
}

/// Gaussian residual probability centered on the theoretical time.
#[must_use]
pub fn residual_prob(dt: f64, spread: f64) -> f64 {
    let spread = if spread > 0.0 { spread } else { DEF_SPREAD };
    let z = dt / spread;
    (-0.5 * z * z).exp() / (spread * (2.0 * std::f64::consts::PI).sqrt())
}

/// Outcome of scoring one pick.
#[derive(Clone, Debug)]
pub struct Identification {
    /// Index of the winning arrival.
    pub arrival: usize,
    /// Winning figure of merit.
    pub fom: f64,
    /// Affinity the pick carries forward.
    pub affinity: f64,
}

/// The phase identifier, parameterized by the group forest.
#[derive(Clone, Copy, Debug)]
pub struct PhaseIdentifier<'a> {
    groups: &'a PhaseGroups,
}

impl<'a> PhaseIdentifier<'a> {
    /// Build an identifier over a group forest.
    #[must_use]
    pub const fn new(groups: &'a PhaseGroups) -> Self {
        Self { groups }
    }

    /// Figure of merit of one `(pick, theory)` pair.
    ///
    /// `observed_group` and `generic` are the cached per-pick state.
    fn figure_of_merit(
        &self,
        pick: &Pick,
        observed_group: &str,
        generic: bool,
        theory: &Arrival,
        observed_tt: f64,
    ) -> (f64, f64) {
        let prob = residual_prob(observed_tt - theory.time, theory.spread);

        let mut amp = theory.observability.max(1.0);
        if theory.flags.contains(PhaseFlags::DOWN_WEIGHT) {
            amp *= DOWN_WEIGHT_FACTOR;
        }

        let exact = pick.observed_phase == theory.phase;
        if (!exact || generic) && observed_group != "all" {
            let group_match = self.groups.group_contains(observed_group, &theory.phase)
                || self
                    .groups
                    .comp_group(observed_group)
                    .is_some_and(|comp| self.groups.group_contains(comp, &theory.phase));
            amp *= if group_match { GROUP_WEIGHT } else { OTHER_WEIGHT };

            if !pick.author.is_automatic() {
                let obs_type = PhaseDesc::parse(&pick.observed_phase).arrival_type();
                let thr_type = PhaseDesc::parse(&theory.phase).arrival_type();
                if obs_type != thr_type {
                    amp *= TYPE_WEIGHT;
                }
            }
        }

        let trial_affinity = if exact {
            amp *= pick.affinity;
            pick.affinity
        } else {
            NULL_AFFINITY
        };

        if pick.current_phase == theory.phase {
            amp *= STICKY_WEIGHT;
        }

        (prob * amp, trial_affinity)
    }

    /// Score one pick against a set of theoretical arrivals and return the
    /// winner, if any arrival scores above zero.
    #[must_use]
    pub fn identify_pick(
        &self,
        pick: &Pick,
        origin_time: f64,
        arrivals: &[Arrival],
    ) -> Option<Identification> {
        let observed_group = self
            .groups
            .find_group(&pick.observed_phase, pick.author.is_automatic());
        let generic = is_generic(&pick.observed_phase);
        let observed_tt = pick.arrival_time - origin_time;

        let mut best: Option<Identification> = None;
        for (i, theory) in arrivals.iter().enumerate() {
            let (fom, affinity) =
                self.figure_of_merit(pick, observed_group, generic, theory, observed_tt);
            if fom > 0.0 && best.as_ref().is_none_or(|b| fom > b.fom) {
                best = Some(Identification {
                    arrival: i,
                    fom,
                    affinity,
                });
            }
        }
        best
    }

    /// Re-identify every used pick of an event against a corrected
    /// session, updating phases, affinities, and residuals in place.
    /// Returns the number of picks identified.
    pub fn identify_event(&self, event: &mut Event, session: &TravelTimeSession<'_>) -> usize {
        let origin_time = event.hypo.origin_time;
        let mut identified = 0;

        // Per-pick state is cached until the pick changes; picks sorted by
        // station arrive in runs sharing the same geometry.
        let mut cached: Option<(f64, f64, Vec<Arrival>)> = None;
        for pick in event.picks.iter_mut().filter(|p| p.use_flag) {
            let reuse = cached.as_ref().is_some_and(|&(delta, azim, _)| {
                (delta - pick.delta).abs() < 1e-9 && (azim - pick.azimuth).abs() < 1e-9
            });
            if !reuse {
                cached = Some((
                    pick.delta,
                    pick.azimuth,
                    session.get_tt_at_azimuth(pick.delta, pick.azimuth, false),
                ));
            }
            let arrivals = &cached.as_ref().unwrap().2;

            if let Some(winner) = self.identify_pick(pick, origin_time, arrivals) {
                let theory = &arrivals[winner.arrival];
                pick.current_phase = theory.phase.clone();
                pick.affinity = winner.affinity;
                pick.travel_time = Some(theory.time);
                pick.residual = Some(pick.arrival_time - origin_time - theory.time);
                pick.fom = Some(winner.fom);
                identified += 1;
            } else {
                pick.residual = None;
                pick.travel_time = None;
                pick.fom = None;
            }
        }
        debug!(identified, "phase identification pass complete");
        identified
    }
}
