//! Per-phase travel-time branches: reference data, per-session depth
//! correction, and the distance-to-time query.
//!
//! A branch holds the surface-focus `(p, tau)` samples of one monotone
//! piece of a phase's travel-time curve. `correct` rebuilds the volatile
//! side for a source depth: samples are truncated at the session `p_max`,
//! shifted by the up-going leg, anchored at the end integrals, re-splined
//! for interior distances, and condensed into per-interval cubic-in-sqrt
//! polynomials that `get_tt` solves directly.

use arrayvec::ArrayVec;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{DTOL, ModelConversions, WaveType};
use crate::phase::{PhaseDesc, PhaseFlags};
use crate::spline;
use crate::upgoing::UpGoingSession;

/// Ray-parameter acceptance tolerance of the interval solver.
const PTOL: f64 = 1e-6;

/// Group velocity of the crustal Lg wave train in km/s.
pub const LG_GROUP_VELOCITY: f64 = 3.4;
/// Group velocity of the LR Rayleigh wave in km/s.
pub const LR_GROUP_VELOCITY: f64 = 3.5;
/// Deepest source that can generate crustal surface waves, in km.
pub const SURFACE_WAVE_MAX_DEPTH: f64 = 55.0;
/// Largest distance for Lg in degrees.
pub const LG_MAX_DELTA: f64 = 30.0;
/// Largest distance for LR in degrees.
pub const LR_MAX_DELTA: f64 = 90.0;
/// P velocity of sea water in km/s, for the pwP delay.
const WATER_VELOCITY: f64 = 1.44;

/// How the query distance was folded into `[0, pi]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DistanceRep {
    /// The fundamental distance.
    Direct,
    /// The wrap-around `2*pi - x`, arriving from the back azimuth.
    Reversed,
    /// The major-arc continuation `x + 2*pi`.
    MajorArc,
}

impl DistanceRep {
    /// All three representations of a fundamental distance in radians.
    #[must_use]
    pub fn all(x: f64) -> [(Self, f64); 3] {
        use std::f64::consts::TAU;
        [
            (Self::Direct, x),
            (Self::Reversed, TAU - x),
            (Self::MajorArc, x + TAU),
        ]
    }

    /// Sign of `dT/dDelta` for this representation.
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Direct | Self::MajorArc => 1.0,
            Self::Reversed => -1.0,
        }
    }
}

/// Diffracted continuation of a branch along a discontinuity.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Diffracted {
    /// Phase code of the diffraction, e.g. `Pdif`.
    pub phase: String,
    /// Smallest diffracted distance in radians.
    pub x_min: f64,
    /// Largest diffracted distance in radians.
    pub x_max: f64,
}

/// Secondary arrival derived from a base phase.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AddOn {
    /// Scattered precursor to PKPdf.
    PkpPre,
    /// Water-column reflection of pP.
    PwP,
    /// Crustal surface-wave train.
    Lg,
    /// Rayleigh wave.
    Lr,
}

/// Immutable reference data of one branch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BranchRef {
    /// Phase code of the branch.
    pub phase: String,
    /// Travel-time segment code.
    pub segment: String,
    /// Wave types of the initial, down-going, and up-coming legs.
    pub wave_types: [WaveType; 3],
    /// Sign of the up-going correction: -1 removes a leg (direct phases),
    /// +1 adds one (depth phases).
    pub sign: i8,
    /// Number of surface-to-bottom round trips (1 for P, 2 for PP).
    pub count: u32,
    /// Slowness range `[p0, p1]` of the surface-focus branch.
    pub p_range: [f64; 2],
    /// Surface-focus distance range in radians.
    pub x_range: [f64; 2],
    /// Surface-focus ray-parameter samples.
    pub p: Vec<f64>,
    /// Surface-focus tau samples.
    pub tau: Vec<f64>,
    /// Pre-computed spline basis of the surface grid.
    pub basis: Array2<f64>,
    /// True for the up-going stub branches replaced wholesale by the
    /// session tables.
    pub is_up_going: bool,
    /// Optional diffracted continuation.
    pub diffracted: Option<Diffracted>,
    /// Optional add-on phase.
    pub add_on: Option<AddOn>,
}

impl BranchRef {
    /// Build a surface-focus branch, deriving the segment code and basis.
    #[must_use]
    pub fn new(
        phase: &str,
        wave_types: [WaveType; 3],
        sign: i8,
        count: u32,
        p: Vec<f64>,
        tau: Vec<f64>,
        x_range: [f64; 2],
    ) -> Self {
        debug_assert_eq!(p.len(), tau.len());
        let basis = spline::build_basis(&p);
        Self {
            phase: phase.to_owned(),
            segment: PhaseDesc::parse(phase).segment,
            wave_types,
            sign,
            count,
            p_range: [p.first().copied().unwrap_or(0.0), p.last().copied().unwrap_or(0.0)],
            x_range,
            p,
            tau,
            basis,
            is_up_going: false,
            diffracted: None,
            add_on: None,
        }
    }

    /// Build an up-going stub branch whose samples come from the session.
    #[must_use]
    pub fn up_going(phase: &str, wave: WaveType) -> Self {
        Self {
            phase: phase.to_owned(),
            segment: PhaseDesc::parse(phase).segment,
            wave_types: [wave; 3],
            sign: 1,
            count: 0,
            p_range: [0.0, 0.0],
            x_range: [0.0, 0.0],
            p: Vec::new(),
            tau: Vec::new(),
            basis: Array2::zeros((5, 0)),
            is_up_going: true,
            diffracted: None,
            add_on: None,
        }
    }

    /// Attach a diffracted continuation.
    #[must_use]
    pub fn with_diffracted(mut self, phase: &str, x_min: f64, x_max: f64) -> Self {
        self.diffracted = Some(Diffracted {
            phase: phase.to_owned(),
            x_min,
            x_max,
        });
        self
    }

    /// Attach an add-on phase.
    #[must_use]
    pub const fn with_add_on(mut self, add_on: AddOn) -> Self {
        self.add_on = Some(add_on);
        self
    }

    fn session_for<'a>(
        &self,
        leg: usize,
        p_up: &'a UpGoingSession,
        s_up: &'a UpGoingSession,
    ) -> &'a UpGoingSession {
        match self.wave_types[leg] {
            WaveType::P => p_up,
            WaveType::S => s_up,
        }
    }

    /// Build the session-corrected volatile state for this branch.
    ///
    /// # Errors
    ///
    /// Propagates numerical failures from the interval fits.
    pub fn correct(&self, p_up: &UpGoingSession, s_up: &UpGoingSession) -> Result<BranchVolatile> {
        if self.is_up_going {
            let session = self.session_for(0, p_up, s_up);
            let x_first = if session.p_grid.first().copied().unwrap_or(1.0) <= DTOL {
                0.0
            } else {
                session.x_up_ends.first().map_or(0.0, |&(_, x)| x)
            };
            return Ok(BranchVolatile::build(
                self,
                session.p_grid.clone(),
                session.tau_up.clone(),
                x_first,
                session.x_end_up,
                1.0,
                session.p_source,
                None,
            ));
        }

        let init = self.session_for(0, p_up, s_up);
        let down = self.session_for(1, p_up, s_up);
        let converted = self.wave_types[0] != self.wave_types[1];
        let sign = f64::from(self.sign);
        let count = f64::from(self.count);

        let p_t = init.p_max.min(down.p_max);
        if self.p_range[0] >= p_t - DTOL {
            return Ok(BranchVolatile::missing(self));
        }

        if self.p_range[1] <= p_t + DTOL {
            // The whole branch survives: correct every sample and both ends.
            let tau: Vec<f64> = self
                .p
                .iter()
                .zip(&self.tau)
                .map(|(&p, &t)| sign.mul_add(init.tau_at(p), t))
                .collect();
            let x_first = sign.mul_add(init.x_at_end(self.p_range[0]), self.x_range[0]);
            let x_last = sign.mul_add(init.x_at_end(self.p_range[1]), self.x_range[1]);
            return Ok(BranchVolatile::build(
                self,
                self.p.clone(),
                tau,
                x_first,
                x_last,
                sign,
                init.p_source,
                Some(&self.basis),
            ));
        }

        // Truncate below the session ceiling and append the exact anchor.
        let mut p: Vec<f64> = Vec::new();
        let mut tau: Vec<f64> = Vec::new();
        for (&pi, &ti) in self.p.iter().zip(&self.tau) {
            if pi < p_t - DTOL {
                p.push(pi);
                tau.push(sign.mul_add(init.tau_at(pi), ti));
            }
        }
        if p.len() < 2 {
            return Ok(BranchVolatile::missing(self));
        }

        let (anchor_tau, anchor_x) = if (p_t - down.p_max).abs() <= DTOL {
            // The ray at p_t bottoms at the source depth: the surface part
            // collapses to the end integrals.
            let surf_tau = 2.0 * count * (down.tau_end_up - down.tau_end_lvz);
            let surf_x = 2.0 * count * (down.x_end_up - down.x_end_lvz);
            let leg_tau = if converted { down.tau_end_cnv } else { down.tau_end_up };
            let leg_x = if converted { down.x_end_cnv } else { down.x_end_up };
            (sign.mul_add(leg_tau, surf_tau), sign.mul_add(leg_x, surf_x))
        } else {
            // Truncated by the initial leg (converted depth phases): the
            // surface branch continues past p_t, so interpolate it there.
            let surf_tau = interp_linear(&self.p, &self.tau, p_t);
            let surf_x = -slope_at(&self.p, &self.tau, p_t);
            (
                sign.mul_add(init.tau_at(p_t), surf_tau),
                sign.mul_add(init.x_end_up, surf_x),
            )
        };
        p.push(p_t);
        tau.push(anchor_tau);

        let x_first = sign.mul_add(init.x_at_end(self.p_range[0]), self.x_range[0]);
        Ok(BranchVolatile::build(
            self,
            p,
            tau,
            x_first,
            anchor_x,
            sign,
            init.p_source,
            None,
        ))
    }
}

fn interp_linear(p: &[f64], tau: &[f64], at: f64) -> f64 {
    let n = p.len();
    if at <= p[0] {
        return tau[0];
    }
    if at >= p[n - 1] {
        return tau[n - 1];
    }
    let mut i = 0;
    while i + 1 < n && p[i + 1] <= at {
        i += 1;
    }
    let f = (at - p[i]) / (p[i + 1] - p[i]);
    (tau[i + 1] - tau[i]).mul_add(f, tau[i])
}

/// Local slope `dtau/dp` estimated from the bracketing samples.
fn slope_at(p: &[f64], tau: &[f64], at: f64) -> f64 {
    let n = p.len();
    let mut i = 0;
    while i + 2 < n && p[i + 1] <= at {
        i += 1;
    }
    (tau[i + 1] - tau[i]) / (p[i + 1] - p[i])
}

/// Caustic classification of one interval.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CausticFlag {
    /// Monotone interval.
    #[default]
    None,
    /// Distance minimum inside the interval.
    Min,
    /// Distance maximum inside the interval.
    Max,
}

/// The per-session state of one branch.
#[derive(Clone, Debug)]
pub struct BranchVolatile {
    /// Set once the spline and polynomials are in place.
    pub computed: bool,
    /// The branch exists at this source depth.
    pub exists: bool,
    /// Effective phase code for this session.
    pub phase: String,
    /// Corrected ray-parameter samples, ending at the session ceiling.
    pub p: Vec<f64>,
    /// Corrected tau samples.
    pub tau: Vec<f64>,
    /// Distances at the samples.
    pub x: Vec<f64>,
    /// Per-interval cubic-in-sqrt coefficients.
    pub poly: Vec<[f64; 4]>,
    /// Per-interval distance envelopes.
    pub x_lim: Vec<[f64; 2]>,
    /// Per-interval caustic flags.
    pub caustic: Vec<CausticFlag>,
    /// Slowness of the flagged caustic, when any interval has one.
    pub p_caustic: f64,
    /// Correction sign applied, reused for the depth derivative.
    sign: f64,
    /// Source slowness of the corrected leg's wave type.
    p_source_leg: f64,
}

impl BranchVolatile {
    fn missing(branch: &BranchRef) -> Self {
        Self {
            computed: true,
            exists: false,
            phase: branch.phase.clone(),
            p: Vec::new(),
            tau: Vec::new(),
            x: Vec::new(),
            poly: Vec::new(),
            x_lim: Vec::new(),
            caustic: Vec::new(),
            p_caustic: 0.0,
            sign: 1.0,
            p_source_leg: 0.0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        branch: &BranchRef,
        p: Vec<f64>,
        tau: Vec<f64>,
        x_first: f64,
        x_last: f64,
        sign: f64,
        p_source_leg: f64,
        reusable_basis: Option<&Array2<f64>>,
    ) -> Self {
        if p.len() < 2 {
            return Self::missing(branch);
        }
        let owned_basis;
        let basis = match reusable_basis {
            Some(b) if b.ncols() == p.len() => b,
            _ => {
                owned_basis = spline::build_basis(&p);
                &owned_basis
            }
        };
        let x = spline::fit_distances(basis, &tau, x_first, x_last);

        let n = p.len();
        let p_end = p[n - 1];
        let mut poly = Vec::with_capacity(n - 1);
        let mut x_lim = Vec::with_capacity(n - 1);
        let mut caustic = Vec::with_capacity(n - 1);
        let mut p_caustic = 0.0;
        for j in 0..n - 1 {
            let dp_left = p_end - p[j];
            let dp_right = p_end - p[j + 1];
            let a = spline::fit_interval_poly(dp_left, dp_right, tau[j], tau[j + 1], x[j], x[j + 1]);

            let mut lo = x[j].min(x[j + 1]);
            let mut hi = x[j].max(x[j + 1]);
            let mut flag = CausticFlag::None;
            // dx/d(dp) = 2 a2 + 0.75 a3 / sqrt(dp) vanishes inside the
            // interval at the caustic.
            if a[2].abs() > 1e-30 {
                let root = -0.375 * a[3] / a[2];
                if root > 0.0 {
                    let dp_star = root * root;
                    if dp_star > dp_right + DTOL && dp_star < dp_left - DTOL {
                        let x_star = spline::poly_x(&a, dp_star);
                        if x_star > hi {
                            hi = x_star;
                            flag = CausticFlag::Max;
                        } else if x_star < lo {
                            lo = x_star;
                            flag = CausticFlag::Min;
                        }
                        if flag != CausticFlag::None {
                            p_caustic = p_end - dp_star;
                        }
                    }
                }
            }
            poly.push(a);
            x_lim.push([lo, hi]);
            caustic.push(flag);
        }

        Self {
            computed: true,
            exists: true,
            phase: branch.phase.clone(),
            p,
            tau,
            x,
            poly,
            x_lim,
            caustic,
            p_caustic,
            sign,
            p_source_leg,
        }
    }

    /// Number of intervals flagged as caustics this session.
    #[must_use]
    pub fn caustic_count(&self) -> usize {
        self.caustic
            .iter()
            .filter(|&&flag| flag != CausticFlag::None)
            .count()
    }

    /// Solve one distance representation against this branch, appending
    /// every arrival to `out`.
    ///
    /// `xs` is the represented distance in radians; `ctx` carries the
    /// session constants. Diffracted continuations and add-on phases are
    /// emitted after their base branch.
    pub fn get_tt(
        &self,
        branch: &BranchRef,
        ctx: &QueryContext<'_>,
        rep: DistanceRep,
        xs: f64,
        out: &mut Vec<Arrival>,
    ) {
        if !self.exists || self.p.len() < 2 {
            return;
        }
        let cvt = ctx.cvt;
        let p_end = self.p[self.p.len() - 1];
        let mut emitted_p: Vec<f64> = Vec::new();

        for (j, a) in self.poly.iter().enumerate() {
            if xs < self.x_lim[j][0] - DTOL || xs > self.x_lim[j][1] + DTOL {
                continue;
            }
            let dp_left = p_end - self.p[j];
            let dp_right = p_end - self.p[j + 1];
            for dp in solve_interval(a, xs) {
                if dp < dp_right - PTOL || dp > dp_left + PTOL {
                    continue;
                }
                let dp = dp.clamp(0.0, dp_left);
                let p_ray = p_end - dp;
                if emitted_p.iter().any(|&q| (q - p_ray).abs() < 1e-9) {
                    continue;
                }
                emitted_p.push(p_ray);

                let mut phase = PhaseDesc::parse(&self.phase);
                if p_ray < self.p_caustic && phase.decoration == Some(crate::phase::Decoration::Ab)
                {
                    phase = phase.to_bc();
                }
                let time = cvt.t_norm * p_ray.mul_add(xs, spline::poly_tau(a, dp));
                let dtdd = rep.sign() * p_ray * cvt.dtddelta();
                let dtdz = self.sign
                    * ctx.dtddepth
                    * self
                        .p_source_leg
                        .mul_add(self.p_source_leg, -(p_ray * p_ray))
                        .abs()
                        .sqrt();
                let dxdp = spline::poly_dxdp(a, dp) / cvt.t_norm;
                out.push(Arrival {
                    phase: phase.to_string(),
                    time,
                    dtdd,
                    dtdz,
                    dxdp,
                    spread: 0.0,
                    observability: 0.0,
                    flags: PhaseFlags::empty(),
                });
            }
        }

        let emitted_base = !emitted_p.is_empty();

        if let Some(diff) = &branch.diffracted
            && xs >= diff.x_min - DTOL
            && xs <= diff.x_max + DTOL
        {
            // The diffraction continues the branch at its grazing (lowest)
            // ray parameter; tau stays fixed along the discontinuity.
            let p_graze = self.p[0];
            out.push(Arrival {
                phase: diff.phase.clone(),
                time: cvt.t_norm * p_graze.mul_add(xs, self.tau[0]),
                dtdd: rep.sign() * p_graze * cvt.dtddelta(),
                dtdz: self.sign
                    * ctx.dtddepth
                    * self
                        .p_source_leg
                        .mul_add(self.p_source_leg, -(p_graze * p_graze))
                        .abs()
                        .sqrt(),
                dxdp: 0.0,
                spread: 0.0,
                observability: 0.0,
                flags: PhaseFlags::empty(),
            });
        }

        if let Some(add_on) = branch.add_on {
            self.emit_add_on(add_on, ctx, rep, xs, emitted_base, out);
        }
    }

    fn emit_add_on(
        &self,
        add_on: AddOn,
        ctx: &QueryContext<'_>,
        rep: DistanceRep,
        xs: f64,
        emitted_base: bool,
        out: &mut Vec<Arrival>,
    ) {
        let cvt = ctx.cvt;
        let delta_deg = xs.to_degrees();
        match add_on {
            AddOn::PkpPre => {
                // The scattered precursor rides on PKPdf wherever the base
                // branch produced it.
                if let Some(base) = out.iter().rfind(|a| a.phase == "PKPdf") {
                    let mut pre = base.clone();
                    pre.phase = "PKPpre".into();
                    out.push(pre);
                }
            }
            AddOn::PwP => {
                if ctx.water_depth_km < crate::topo::MIN_PWP_WATER_DEPTH {
                    return;
                }
                if let Some(base) = out.iter().rfind(|a| a.phase == "pP") {
                    let p_skm = base.dtdd.abs() / cvt.deg_to_km();
                    let vertical =
                        (WATER_VELOCITY.powi(-2) - p_skm * p_skm).max(0.0).sqrt();
                    let mut pwp = base.clone();
                    pwp.phase = "pwP".into();
                    pwp.time += 2.0 * ctx.water_depth_km * vertical;
                    out.push(pwp);
                }
            }
            AddOn::Lg => {
                if emitted_base
                    && rep == DistanceRep::Direct
                    && ctx.depth_km <= SURFACE_WAVE_MAX_DEPTH
                    && delta_deg <= LG_MAX_DELTA
                {
                    out.push(surface_wave("Lg", cvt, delta_deg, LG_GROUP_VELOCITY));
                }
            }
            AddOn::Lr => {
                if emitted_base
                    && rep == DistanceRep::Direct
                    && ctx.depth_km <= SURFACE_WAVE_MAX_DEPTH
                    && delta_deg <= LR_MAX_DELTA
                {
                    out.push(surface_wave("LR", cvt, delta_deg, LR_GROUP_VELOCITY));
                }
            }
        }
    }
}

fn surface_wave(phase: &str, cvt: &ModelConversions, delta_deg: f64, velocity: f64) -> Arrival {
    Arrival {
        phase: phase.to_owned(),
        time: delta_deg * cvt.deg_to_km() / velocity,
        dtdd: cvt.deg_to_km() / velocity,
        dtdz: 0.0,
        dxdp: 0.0,
        spread: 0.0,
        observability: 0.0,
        flags: PhaseFlags::empty(),
    }
}

/// Roots in `dp` of `a1 + 2 a2 dp + 1.5 a3 sqrt(dp) = xs`.
fn solve_interval(a: &[f64; 4], xs: f64) -> ArrayVec<f64, 2> {
    let mut roots = ArrayVec::new();
    let c = a[1] - xs;
    let b = 1.5 * a[3];
    let q = 2.0 * a[2];

    if q.abs() <= 1e-30 {
        if b.abs() <= 1e-30 {
            return roots;
        }
        let u = -c / b;
        if u >= 0.0 {
            roots.push(u * u);
        }
        return roots;
    }

    let disc = b.mul_add(b, -(4.0 * q * c));
    if disc < 0.0 {
        return roots;
    }
    let sd = disc.sqrt();
    for u in [(-b + sd) / (2.0 * q), (-b - sd) / (2.0 * q)] {
        if u >= 0.0 {
            roots.push(u * u);
        }
    }
    roots
}

/// Session constants shared by every branch query.
#[derive(Clone, Copy, Debug)]
pub struct QueryContext<'a> {
    /// The model converter.
    pub cvt: &'a ModelConversions,
    /// Source depth in kilometers.
    pub depth_km: f64,
    /// Depth-derivative factor at the source.
    pub dtddepth: f64,
    /// Water depth at the surface bounce point in kilometers.
    pub water_depth_km: f64,
}

/// One theoretical arrival.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Arrival {
    /// Phase code.
    pub phase: String,
    /// Travel time in seconds.
    pub time: f64,
    /// Ray parameter in s/deg, signed by the distance representation.
    pub dtdd: f64,
    /// Depth derivative in s/km.
    pub dtdz: f64,
    /// Derivative of distance with respect to ray parameter.
    pub dxdp: f64,
    /// Statistical residual spread in seconds.
    pub spread: f64,
    /// Relative observability.
    pub observability: f64,
    /// Categorical flags of the phase.
    pub flags: PhaseFlags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelSample, ModelShell};
    use crate::upgoing::UpGoingRef;
    use float_cmp::assert_approx_eq;

    fn conversions() -> ModelConversions {
        ModelConversions::new(1.0 / 6371.0, 6371.0 / 8.04, 8.04, 6371.0)
    }

    fn sample(cvt: &ModelConversions, depth_km: f64, p: f64, up_index: usize) -> ModelSample {
        ModelSample {
            z: cvt.flat_depth(depth_km),
            p,
            up_index,
        }
    }

    fn shells(cvt: &ModelConversions) -> (ModelShell, ModelShell) {
        let p = ModelShell::new(
            WaveType::P,
            vec![
                sample(cvt, 0.0, 1.00, 0),
                sample(cvt, 50.0, 0.94, 1),
                sample(cvt, 150.0, 0.88, 2),
                sample(cvt, 400.0, 0.78, 3),
                sample(cvt, 800.0, 0.66, 4),
            ],
        )
        .unwrap();
        let s = ModelShell::new(
            WaveType::S,
            vec![
                sample(cvt, 0.0, 1.80, 0),
                sample(cvt, 50.0, 1.70, 1),
                sample(cvt, 150.0, 1.60, 2),
                sample(cvt, 400.0, 1.42, 3),
                sample(cvt, 800.0, 1.20, 4),
            ],
        )
        .unwrap();
        (p, s)
    }

    fn sessions(cvt: &ModelConversions, depth_km: f64) -> (UpGoingSession, UpGoingSession) {
        let (p_shell, s_shell) = shells(cvt);
        let p_grid: Vec<f64> = (0..=50).map(|i| 0.02 * f64::from(i)).collect();
        let s_grid: Vec<f64> = (0..=50).map(|i| 0.036 * f64::from(i)).collect();
        let ends = vec![0.2, 0.4, 0.6, 0.66, 0.78, 0.88, 0.94, 1.0];
        let s_ends = vec![0.4, 0.8, 1.2, 1.42, 1.6, 1.7, 1.8];
        let p_up = UpGoingRef::generate(&p_shell, p_grid, ends, 35.0).unwrap();
        let s_up = UpGoingRef::generate(&s_shell, s_grid, s_ends, 35.0).unwrap();
        (
            p_up.new_session(&p_shell, &s_shell, cvt, depth_km, 0.0).unwrap(),
            s_up.new_session(&s_shell, &p_shell, cvt, depth_km, 0.0).unwrap(),
        )
    }

    /// A smooth synthetic surface-focus P branch: tau decreasing and convex
    /// in p, distances positive.
    fn p_branch() -> BranchRef {
        let p: Vec<f64> = (0..=20).map(|i| 0.05 * f64::from(i)).collect();
        let p_end = 1.0;
        // tau(p) of the form c0 + c2 dp^2 + c3 dp^(3/2): inside the spline
        // space, so interior distances are reproduced exactly.
        let tau: Vec<f64> = p
            .iter()
            .map(|&pi| {
                let dp: f64 = p_end - pi;
                0.02_f64.mul_add(dp.powf(1.5), 0.3 * dp * dp)
            })
            .collect();
        let x_of = |pi: f64| {
            let dp: f64 = p_end - pi;
            0.03_f64.mul_add(dp.sqrt(), 0.6 * dp)
        };
        BranchRef::new(
            "P",
            [WaveType::P; 3],
            -1,
            1,
            p.clone(),
            tau,
            [x_of(p[0]), x_of(p[20])],
        )
    }

    #[test]
    fn correction_truncates_at_p_max_and_anchors_at_the_end_integrals() {
        let cvt = conversions();
        let (p_up, s_up) = sessions(&cvt, 300.0);
        let branch = p_branch();
        let vol = branch.correct(&p_up, &s_up).unwrap();

        assert!(vol.exists);
        let last = *vol.p.last().unwrap();
        assert_approx_eq!(f64, last, p_up.p_max, epsilon = 1e-12);
        // Invariant: the corrected branch ends at (tau_end_up, x_end_up)
        // reconstructed from the end integrals (direct phase, count 1).
        let expect_tau = 2.0_f64.mul_add(p_up.tau_end_up, -p_up.tau_end_up);
        assert_approx_eq!(f64, *vol.tau.last().unwrap(), expect_tau, epsilon = 1e-6);
        assert_approx_eq!(
            f64,
            *vol.x.last().unwrap(),
            2.0_f64.mul_add(p_up.x_end_up, -p_up.x_end_up),
            epsilon = 1e-6
        );
        // Every surviving sample was shifted by the up-going leg.
        for (i, &pi) in vol.p.iter().enumerate().take(vol.p.len() - 1) {
            let surf = interp_linear(&branch.p, &branch.tau, pi);
            assert_approx_eq!(
                f64,
                vol.tau[i],
                surf - p_up.tau_at(pi),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn depth_phase_adds_the_leg() {
        let cvt = conversions();
        let (p_up, s_up) = sessions(&cvt, 300.0);
        let mut branch = p_branch();
        branch.phase = "pP".into();
        branch.sign = 1;
        let vol = branch.correct(&p_up, &s_up).unwrap();
        let expect_tau = 2.0_f64.mul_add(p_up.tau_end_up, p_up.tau_end_up);
        assert_approx_eq!(f64, *vol.tau.last().unwrap(), expect_tau, epsilon = 1e-6);
    }

    #[test]
    fn travel_time_query_is_consistent_with_the_polynomials() {
        let cvt = conversions();
        let (p_up, s_up) = sessions(&cvt, 300.0);
        let branch = p_branch();
        let vol = branch.correct(&p_up, &s_up).unwrap();
        let ctx = QueryContext {
            cvt: &cvt,
            depth_km: 300.0,
            dtddepth: cvt.dtddepth(cvt.flat_depth(300.0)),
            water_depth_km: 0.0,
        };

        // Probe the middle of an interior interval.
        let j = vol.poly.len() / 2;
        let p_end = *vol.p.last().unwrap();
        let dp_probe = f64::midpoint(p_end - vol.p[j], p_end - vol.p[j + 1]);
        let xs = spline::poly_x(&vol.poly[j], dp_probe);

        let mut out = Vec::new();
        vol.get_tt(&branch, &ctx, DistanceRep::Direct, xs, &mut out);
        assert!(!out.is_empty());

        let arr = &out[0];
        // Invariant: recomputed tau matches t - p*xs within 1e-5 s, and
        // dT/dDelta recovers the ray parameter.
        let p_ray = arr.dtdd.abs() / cvt.dtddelta();
        let dp = p_end - p_ray;
        let tau_poly = vol
            .poly
            .iter()
            .enumerate()
            .find(|(k, _)| {
                let left = p_end - vol.p[*k];
                let right = p_end - vol.p[*k + 1];
                dp <= left + 1e-9 && dp >= right - 1e-9
            })
            .map(|(_, a)| spline::poly_tau(a, dp))
            .unwrap();
        assert_approx_eq!(
            f64,
            cvt.t_norm * tau_poly,
            p_ray.mul_add(-(xs * cvt.t_norm), arr.time),
            epsilon = 1e-5
        );
        // Depth derivative is negative for a direct phase.
        assert!(arr.dtdz < 0.0);
    }

    #[test]
    fn out_of_range_distances_produce_no_arrival() {
        let cvt = conversions();
        let (p_up, s_up) = sessions(&cvt, 300.0);
        let branch = p_branch();
        let vol = branch.correct(&p_up, &s_up).unwrap();
        let ctx = QueryContext {
            cvt: &cvt,
            depth_km: 300.0,
            dtddepth: cvt.dtddepth(cvt.flat_depth(300.0)),
            water_depth_km: 0.0,
        };
        let mut out = Vec::new();
        vol.get_tt(&branch, &ctx, DistanceRep::Direct, 2.9, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn diffracted_extension_is_emitted_in_its_window() {
        let cvt = conversions();
        let (p_up, s_up) = sessions(&cvt, 300.0);
        let branch = p_branch().with_diffracted("Pdif", 0.2, 1.5);
        let vol = branch.correct(&p_up, &s_up).unwrap();
        let ctx = QueryContext {
            cvt: &cvt,
            depth_km: 300.0,
            dtddepth: cvt.dtddepth(cvt.flat_depth(300.0)),
            water_depth_km: 0.0,
        };
        let mut out = Vec::new();
        vol.get_tt(&branch, &ctx, DistanceRep::Direct, 1.2, &mut out);
        assert!(out.iter().any(|a| a.phase == "Pdif"));
        let mut out2 = Vec::new();
        vol.get_tt(&branch, &ctx, DistanceRep::Direct, 1.8, &mut out2);
        assert!(!out2.iter().any(|a| a.phase == "Pdif"));
    }

    #[test]
    fn surface_wave_add_ons_have_fixed_slowness() {
        let cvt = conversions();
        let arr = surface_wave("Lg", &cvt, 10.0, LG_GROUP_VELOCITY);
        assert_approx_eq!(
            f64,
            arr.time,
            10.0 * cvt.deg_to_km() / LG_GROUP_VELOCITY,
            epsilon = 1e-9
        );
        assert_approx_eq!(f64, arr.dtdz, 0.0, epsilon = 0.0);
        assert_approx_eq!(f64, arr.dtdd * 10.0, arr.time, epsilon = 1e-9);
    }

    #[test]
    fn up_going_branch_mirrors_the_session_grid() {
        let cvt = conversions();
        let (p_up, s_up) = sessions(&cvt, 300.0);
        let branch = BranchRef::up_going("P", WaveType::P);
        let vol = branch.correct(&p_up, &s_up).unwrap();
        assert!(vol.exists);
        assert_eq!(vol.p, p_up.p_grid);
        assert_eq!(vol.tau, p_up.tau_up);
        assert_approx_eq!(f64, *vol.x.last().unwrap(), p_up.x_end_up, epsilon = 0.0);
    }

    #[test]
    fn caustics_widen_the_envelope_and_record_their_slowness() {
        let cvt = conversions();
        // A surface source leaves every correction at zero, so the branch
        // keeps its analytic form: x = 3 + 2 dp - 3 sqrt(dp) has a minimum
        // at sqrt(dp) = 0.75, inside the first interval.
        let (p_up, s_up) = sessions(&cvt, 0.0);
        let p_end: f64 = 0.7;
        let p: Vec<f64> = vec![0.1, 0.25, 0.4, 0.55, 0.7];
        let tau_of = |dp: f64| 2.0_f64.mul_add(-dp.powf(1.5), dp.mul_add(dp, 3.0 * dp)) + 10.0;
        let x_of = |dp: f64| 3.0_f64.mul_add(-dp.sqrt(), 2.0_f64.mul_add(dp, 3.0));
        let tau: Vec<f64> = p.iter().map(|&pi| tau_of(p_end - pi)).collect();
        let branch = BranchRef::new(
            "PKPab",
            [WaveType::P; 3],
            -1,
            1,
            p,
            tau,
            [x_of(0.6), x_of(0.0)],
        );

        let vol = branch.correct(&p_up, &s_up).unwrap();
        assert!(vol.exists);
        assert_eq!(vol.caustic[0], CausticFlag::Min);
        assert_eq!(vol.caustic_count(), 1);
        assert_approx_eq!(f64, vol.p_caustic, 0.7 - 0.5625, epsilon = 1e-6);
        // The envelope was widened down to the interior minimum.
        let x_star = x_of(0.5625);
        assert_approx_eq!(f64, vol.x_lim[0][0], x_star, epsilon = 1e-6);
        assert!(vol.x_lim[0][0] < vol.x[0].min(vol.x[1]));

        // Just above the minimum both sheets arrive; the one below the
        // caustic slowness is relabeled to the prograde code.
        let ctx = QueryContext {
            cvt: &cvt,
            depth_km: 0.0,
            dtddepth: cvt.dtddepth(cvt.flat_depth(0.0)),
            water_depth_km: 0.0,
        };
        let xs = f64::midpoint(x_star, x_of(0.6));
        let mut out = Vec::new();
        vol.get_tt(&branch, &ctx, DistanceRep::Direct, xs, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|a| a.phase == "PKPab"));
        assert!(out.iter().any(|a| a.phase == "PKPbc"));
    }

    #[test]
    fn interval_solver_finds_both_roots() {
        // x(dp) = 1 + 2 dp - 3 sqrt(dp): a1=1, a2=1, a3=-2.
        let a = [0.0, 1.0, 1.0, -2.0];
        let roots = solve_interval(&a, 0.9);
        assert_eq!(roots.len(), 2);
        for dp in roots {
            assert_approx_eq!(f64, spline::poly_x(&a, dp), 0.9, epsilon = 1e-9);
        }
    }
}
