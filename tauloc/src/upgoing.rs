//! Pre-integrated up-going tau and distance tables and their per-session
//! depth correction.
//!
//! The stored tables hold, for every discrete source depth of the model,
//! the tau integral from the surface down to that depth over the up-going
//! ray-parameter grid, plus the matching distances at the branch-end ray
//! parameters. `new_session` turns the nearest stored entry into the exact
//! source-depth table with a single partial-layer integral per sample and
//! pre-computes the end integrals every branch correction anchors on.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decimate;
use crate::error::{Error, Result};
use crate::integrate;
use crate::model::{DTOL, ModelConversions, ModelShell, SourcePosition, WaveType};

/// Stored up-going integrals for one discrete source depth.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpGoingDepth {
    /// Tau from the surface to this depth, over the leading entries of the
    /// tau ray-parameter grid.
    pub tau: Vec<f64>,
    /// Distance from the surface to this depth at the leading entries of
    /// the branch-end ray-parameter grid.
    pub x: Vec<f64>,
}

/// The read-only up-going table of one wave type.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpGoingRef {
    wave: WaveType,
    /// Ray-parameter grid of the tau samples.
    p_tau_up: Vec<f64>,
    /// Branch-end ray parameters where distances are stored.
    p_x_up: Vec<f64>,
    /// One entry per stored source depth, indexed by
    /// [`crate::model::ModelSample::up_index`].
    depths: Vec<UpGoingDepth>,
    /// Sources above this depth replace the native grid entirely.
    shallow_limit_km: f64,
}

/// The depth-corrected up-going table of one session and wave type.
#[derive(Clone, Debug)]
pub struct UpGoingSession {
    /// Wave type of the up-going leg.
    pub wave: WaveType,
    /// Flattened source depth.
    pub z_source: f64,
    /// Slowness at the source.
    pub p_source: f64,
    /// Largest ray parameter that reaches the surface from the source.
    pub p_max: f64,
    /// Corrected ray-parameter grid, ending exactly at `p_max`.
    pub p_grid: Vec<f64>,
    /// Corrected tau from surface to source at `p_grid`.
    pub tau_up: Vec<f64>,
    /// Corrected `(p, x)` pairs at branch-end ray parameters up to `p_max`.
    pub x_up_ends: Vec<(f64, f64)>,
    /// Tau of the surface-to-source ray at `p_max`.
    pub tau_end_up: f64,
    /// Distance of the surface-to-source ray at `p_max`.
    pub x_end_up: f64,
    /// Tau across the low-velocity-zone span at `p_max` (zero without one).
    pub tau_end_lvz: f64,
    /// Distance across the low-velocity-zone span at `p_max`.
    pub x_end_lvz: f64,
    /// Tau of the converted (other wave type) surface-to-source leg.
    pub tau_end_cnv: f64,
    /// Distance of the converted surface-to-source leg.
    pub x_end_cnv: f64,
}

/// Slowness/depth pairs from the surface down to the exact source point.
fn profile_to_source(shell: &ModelShell, pos: &SourcePosition, from: usize) -> Vec<(f64, f64)> {
    let mut prof: Vec<(f64, f64)> = shell.samples()[from..=pos.index]
        .iter()
        .map(|s| (s.p, s.z))
        .collect();
    if pos.z_source < shell.samples()[pos.index].z - DTOL {
        prof.push((pos.p_source, pos.z_source));
    }
    prof
}

impl UpGoingRef {
    /// Wrap stored tables.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] when a depth entry is longer
    /// than its ray-parameter grid.
    pub fn new(
        wave: WaveType,
        p_tau_up: Vec<f64>,
        p_x_up: Vec<f64>,
        depths: Vec<UpGoingDepth>,
        shallow_limit_km: f64,
    ) -> Result<Self> {
        for (i, d) in depths.iter().enumerate() {
            if d.tau.len() > p_tau_up.len() || d.x.len() > p_x_up.len() {
                return Err(Error::TableIntegrity(format!(
                    "up-going depth record {i} longer than its grid"
                )));
            }
        }
        Ok(Self {
            wave,
            p_tau_up,
            p_x_up,
            depths,
            shallow_limit_km,
        })
    }

    /// Generate the stored tables directly from a model shell with the tau
    /// integrator, one entry per shell sample.
    ///
    /// # Errors
    ///
    /// Propagates integrator failures.
    pub fn generate(
        shell: &ModelShell,
        p_tau_up: Vec<f64>,
        p_x_up: Vec<f64>,
        shallow_limit_km: f64,
    ) -> Result<Self> {
        let mut depths = Vec::with_capacity(shell.samples().len());
        for (k, _) in shell.samples().iter().enumerate() {
            let prof: Vec<(f64, f64)> = shell.samples()[..=k].iter().map(|s| (s.p, s.z)).collect();
            let p_ceiling = prof.iter().map(|&(p, _)| p).fold(f64::INFINITY, f64::min);

            let mut tau = Vec::new();
            for &p in p_tau_up.iter().filter(|&&p| p <= p_ceiling + DTOL) {
                tau.push(integrate::profile(p, &prof)?.tau);
            }
            let mut x = Vec::new();
            for &p in p_x_up.iter().filter(|&&p| p <= p_ceiling + DTOL) {
                x.push(integrate::profile(p, &prof)?.dist);
            }
            depths.push(UpGoingDepth { tau, x });
        }
        Self::new(shell.wave(), p_tau_up, p_x_up, depths, shallow_limit_km)
    }

    /// The tau ray-parameter grid.
    #[must_use]
    pub fn p_tau_up(&self) -> &[f64] {
        &self.p_tau_up
    }

    /// The stored depth entries.
    #[must_use]
    pub fn depths(&self) -> &[UpGoingDepth] {
        &self.depths
    }

    /// Build the depth-corrected session table.
    ///
    /// Deep sources correct the stored entry nearest above the source with
    /// one partial-layer integral per sample and decimate the grid to
    /// `x_min`; shallow sources rebuild the grid as a small geometric one
    /// and re-integrate. Also computes the three end integrals used as
    /// branch anchors.
    ///
    /// # Errors
    ///
    /// [`Error::InputRange`] when the source is below the deepest table
    /// depth, [`Error::TableIntegrity`] on inconsistent stored records, and
    /// [`Error::Numerical`] from the integrator.
    pub fn new_session(
        &self,
        shell: &ModelShell,
        other_shell: &ModelShell,
        cvt: &ModelConversions,
        depth_km: f64,
        x_min: f64,
    ) -> Result<UpGoingSession> {
        let z_source = cvt.flat_depth(depth_km);
        let pos = shell.locate(z_source)?;
        let full_profile = profile_to_source(shell, &pos, 0);

        let end_up = integrate::profile(pos.p_max, &full_profile)?;
        let end_lvz = match pos.lvz_top {
            Some(top) => integrate::profile(pos.p_max, &profile_to_source(shell, &pos, top))?,
            None => integrate::LayerIntegral::default(),
        };
        let end_cnv = match other_shell.locate(z_source) {
            Ok(other_pos) => {
                integrate::profile(pos.p_max, &profile_to_source(other_shell, &other_pos, 0))?
            }
            Err(_) => integrate::LayerIntegral::default(),
        };

        let (p_grid, tau_up, x_up_ends) = if depth_km <= self.shallow_limit_km {
            self.shallow_tables(&pos, &full_profile)?
        } else {
            self.corrected_tables(shell, &pos, x_min, end_up.tau)?
        };

        debug!(
            wave = ?self.wave,
            depth_km,
            p_max = pos.p_max,
            samples = p_grid.len(),
            "up-going session ready"
        );

        Ok(UpGoingSession {
            wave: self.wave,
            z_source,
            p_source: pos.p_source,
            p_max: pos.p_max,
            p_grid,
            tau_up,
            x_up_ends,
            tau_end_up: end_up.tau,
            x_end_up: end_up.dist,
            tau_end_lvz: end_lvz.tau,
            x_end_lvz: end_lvz.dist,
            tau_end_cnv: end_cnv.tau,
            x_end_cnv: end_cnv.dist,
        })
    }

    /// Replacement tables for a shallow source: the native grid is too
    /// sparse near the surface, so a 5 or 6 point geometric grid is built
    /// and re-integrated from scratch.
    #[allow(clippy::type_complexity)]
    fn shallow_tables(
        &self,
        pos: &SourcePosition,
        full_profile: &[(f64, f64)],
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<(f64, f64)>)> {
        let n: usize = if pos.lvz_top.is_some() { 6 } else { 5 };
        let power = (n + 1) as i32;
        let dp = 0.75 * pos.p_max / f64::from(u32::try_from(n - 2).unwrap()).powi(power);

        let mut p_grid = vec![0.0];
        for j in (0..=n - 2).rev() {
            p_grid.push(dp.mul_add(-f64::from(u32::try_from(j).unwrap()).powi(power), pos.p_max));
        }

        let mut tau_up = Vec::with_capacity(p_grid.len());
        for &p in &p_grid {
            tau_up.push(integrate::profile(p, full_profile)?.tau);
        }

        let mut x_up_ends = Vec::new();
        for &p in self.p_x_up.iter().filter(|&&p| p <= pos.p_max + DTOL) {
            x_up_ends.push((p, integrate::profile(p, full_profile)?.dist));
        }
        Ok((p_grid, tau_up, x_up_ends))
    }

    /// Correct the stored entry nearest above the source by one partial
    /// layer, then decimate to the branch engine's distance target.
    #[allow(clippy::type_complexity)]
    fn corrected_tables(
        &self,
        shell: &ModelShell,
        pos: &SourcePosition,
        x_min: f64,
        tau_end_up: f64,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<(f64, f64)>)> {
        let sample = shell.samples()[pos.index];
        let entry = self.depths.get(sample.up_index).ok_or_else(|| {
            Error::TableIntegrity(format!(
                "up-going index {} out of range ({} records)",
                sample.up_index,
                self.depths.len()
            ))
        })?;

        let mut p_grid = Vec::new();
        let mut tau_up = Vec::new();
        for (i, &p) in self
            .p_tau_up
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p < pos.p_max - DTOL)
        {
            let stored = *entry.tau.get(i).ok_or_else(|| {
                Error::TableIntegrity(format!(
                    "up-going tau record too short at sample {i} for {:?}",
                    self.wave
                ))
            })?;
            let part = integrate::layer(p, sample.p, sample.z, pos.p_source, pos.z_source)?;
            p_grid.push(p);
            tau_up.push(stored + part.tau);
        }

        if p_grid.len() > 2 && x_min > 0.0 {
            let keep = decimate::thin_grid(&p_grid, &tau_up, x_min);
            p_grid = decimate::apply_mask(&p_grid, &keep);
            tau_up = decimate::apply_mask(&tau_up, &keep);
        }
        p_grid.push(pos.p_max);
        tau_up.push(tau_end_up);

        let mut x_up_ends = Vec::new();
        for (j, &p) in self
            .p_x_up
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p <= pos.p_max + DTOL)
        {
            let Some(&stored) = entry.x.get(j) else {
                break;
            };
            let part = integrate::layer(p, sample.p, sample.z, pos.p_source, pos.z_source)?;
            x_up_ends.push((p, stored + part.dist));
        }
        Ok((p_grid, tau_up, x_up_ends))
    }
}

impl UpGoingSession {
    /// Corrected up-going tau at an arbitrary ray parameter, exact on grid
    /// samples and linearly interpolated between them.
    #[must_use]
    pub fn tau_at(&self, p: f64) -> f64 {
        let n = self.p_grid.len();
        if n == 0 {
            return 0.0;
        }
        if p <= self.p_grid[0] {
            return self.tau_up[0];
        }
        if p >= self.p_grid[n - 1] - DTOL {
            return self.tau_up[n - 1];
        }
        let mut i = 0;
        while i + 1 < n && self.p_grid[i + 1] <= p + DTOL {
            i += 1;
        }
        if (self.p_grid[i] - p).abs() <= DTOL {
            return self.tau_up[i];
        }
        let f = (p - self.p_grid[i]) / (self.p_grid[i + 1] - self.p_grid[i]);
        (self.tau_up[i + 1] - self.tau_up[i]).mul_add(f, self.tau_up[i])
    }

    /// Corrected up-going distance at a branch-end ray parameter.
    #[must_use]
    pub fn x_at_end(&self, p: f64) -> f64 {
        if (p - self.p_max).abs() <= DTOL {
            return self.x_end_up;
        }
        self.x_up_ends
            .iter()
            .min_by(|a, b| {
                (a.0 - p)
                    .abs()
                    .partial_cmp(&(b.0 - p).abs())
                    .unwrap()
            })
            .map_or(0.0, |&(_, x)| x)
    }
}
