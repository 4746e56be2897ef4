//! Closed-form tau and distance integrals through the flattened model.
//!
//! Within one layer the slowness follows the exponential profile
//! `u(z) = b + (p_top - b) * exp(z - z_top)` fitted through the two layer
//! endpoints. Substituting `w = u(z)` turns both integrals into elementary
//! antiderivatives in `w`, with distinct branches depending on the sign of
//! `b^2 - p^2`. The five tolerance-selected cases must stay separate:
//! evaluating the general branch at a degenerate layer loses the leading
//! digits exactly where branch ends meet.

use crate::error::{Error, Result};
use crate::model::{DTOL, layer_b};
use std::f64::consts::FRAC_PI_2;

/// Tau and distance accumulated by a ray over one model layer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LayerIntegral {
    /// Normalized delay time.
    pub tau: f64,
    /// Normalized distance in radians.
    pub dist: f64,
}

impl LayerIntegral {
    fn checked(tau: f64, dist: f64) -> Result<Self> {
        if tau < -DTOL || dist < -DTOL {
            return Err(Error::Numerical(format!(
                "negative layer integral: tau={tau:.3e} dist={dist:.3e}"
            )));
        }
        Ok(Self {
            tau: tau.max(0.0),
            dist: dist.max(0.0),
        })
    }
}

/// Antiderivative pieces of the general case, evaluated at one endpoint.
///
/// `g` accumulates tau, `i1` is the common integral shared by the distance
/// and the `b^2 - p^2` tail of tau.
struct Endpoint {
    u: f64,
    s: f64,
}

fn i1_difference(p: f64, b: f64, hi: &Endpoint, lo: &Endpoint) -> f64 {
    let disc = b.mul_add(b, -(p * p));

    if disc.abs() <= DTOL {
        // b == +-p within tolerance.
        -(hi.s / (hi.u - b) - lo.s / (lo.u - b)) / b
    } else if disc > 0.0 {
        let sd = disc.sqrt();
        let n_hi = sd.mul_add(hi.s, b.mul_add(hi.u, -(p * p)));
        let n_lo = sd.mul_add(lo.s, b.mul_add(lo.u, -(p * p)));
        let ratio = (n_hi * (lo.u - b)) / (n_lo * (hi.u - b));
        -(ratio.abs().max(1e-30).ln()) / sd
    } else {
        let se = (-disc).sqrt();
        let g_at = |e: &Endpoint| {
            let g = b.mul_add(e.u, -(p * p)) / (p * (e.u - b));
            g.clamp(-1.0, 1.0).asin()
        };
        (g_at(hi) - g_at(lo)) / se
    }
}

/// Evaluate the tau and distance integrals for ray parameter `p` over the
/// layer bounded by `(p_top, z_top)` and `(p_bot, z_bot)`.
///
/// The layer contribution stops at the turning point when the ray bottoms
/// inside the layer and vanishes when the ray cannot enter it at all. At the
/// center of the earth (`p` and `p_bot` both vanishing) the distance is
/// pinned to `pi/2` so that a ray to the antipode accumulates the full
/// distance in the last layer.
///
/// # Errors
///
/// Fails with [`Error::Numerical`] when either integral comes out negative
/// beyond tolerance, which indicates a corrupted model.
pub fn layer(p: f64, p_top: f64, z_top: f64, p_bot: f64, z_bot: f64) -> Result<LayerIntegral> {
    // Zero-thickness layer.
    if (z_top - z_bot).abs() <= DTOL {
        return Ok(LayerIntegral::default());
    }

    let h = z_top - z_bot;

    // Constant-slowness layer: the exponential fit is degenerate there.
    if (p_top - p_bot).abs() <= DTOL {
        if p >= p_top - DTOL {
            return Ok(LayerIntegral::default());
        }
        let q = p_top.mul_add(p_top, -(p * p)).sqrt();
        return LayerIntegral::checked(h * q, h * p / q);
    }

    let b = layer_b(p_top, z_top, p_bot, z_bot);

    // Vertical ray, including the straight-through ray at the center.
    if p <= DTOL {
        let tau = b.mul_add(h, p_top - p_bot);
        let dist = if p_bot <= DTOL { FRAC_PI_2 } else { 0.0 };
        return LayerIntegral::checked(tau, dist);
    }

    // The ray turns above the layer or grazes its top.
    if p >= p_top.max(p_bot) - DTOL {
        return Ok(LayerIntegral::default());
    }

    // Clip the lower end at the turning point (normal layers only; inside a
    // low-velocity zone the slowness grows downward and the ray crosses the
    // whole layer).
    let u_lo_val = if p_top >= p_bot { p_bot.max(p) } else { p_bot };

    let s_of = |u: f64| {
        let d = u.mul_add(u, -(p * p));
        if d.abs() <= DTOL { 0.0 } else { d.sqrt() }
    };
    let hi = Endpoint {
        u: p_top,
        s: s_of(p_top),
    };
    let lo = Endpoint {
        u: u_lo_val,
        s: s_of(u_lo_val),
    };

    // The same antiderivative differences hold for normal and
    // low-velocity-zone layers: neither `u - b` nor the log argument
    // changes sign inside one layer.
    let i1 = i1_difference(p, b, &hi, &lo);
    let disc = b.mul_add(b, -(p * p));
    let log_part = b * ((hi.u + hi.s) / (lo.u + lo.s)).ln();
    let tau = disc.mul_add(i1, hi.s - lo.s + log_part);
    let dist = p * i1;

    LayerIntegral::checked(tau, dist)
}

/// Accumulate [`layer`] over a slowness profile sampled as `(p, z)` pairs
/// ordered from the surface downward.
///
/// # Errors
///
/// Propagates any [`Error::Numerical`] from the per-layer evaluation.
pub fn profile(p: f64, samples: &[(f64, f64)]) -> Result<LayerIntegral> {
    let mut total = LayerIntegral::default();
    for pair in samples.windows(2) {
        let (p_top, z_top) = pair[0];
        let (p_bot, z_bot) = pair[1];
        let part = layer(p, p_top, z_top, p_bot, z_bot)?;
        total.tau += part.tau;
        total.dist += part.dist;
    }
    Ok(total)
}
