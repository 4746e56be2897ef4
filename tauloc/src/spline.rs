//! Interpolation basis for tau as a function of ray parameter.
//!
//! Distance is `-dtau/dp`, which is singular like `1/sqrt(p_end - p)` at a
//! branch end. Ordinary polynomial splines lose the curve there, so the
//! engine interpolates in the span `{1, dp, dp^2, dp^(3/2)}` with
//! `dp = p_end - p`: per interval tau is cubic in `sqrt(dp)` without the
//! linear term. [`build_basis`] constructs local basis functions of that
//! space, C2-joined at interior knots and clamped at the grid ends, each
//! non-zero at no more than three grid points; the five stored rows per
//! sample are everything the distance solve and the travel-time query need.

use ndarray::Array2;

/// Floor for `sqrt(dp)` in derivative denominators.
pub const SPTOL: f64 = 1e-5;

/// Solve a small dense system in place with partial pivoting. Returns false
/// when the matrix is numerically singular.
fn solve_dense(n: usize, a: &mut [f64], rhs: &mut [f64]) -> bool {
    for c in 0..n {
        let pivot_row = (c..n)
            .max_by(|&i, &j| {
                a[i * n + c]
                    .abs()
                    .partial_cmp(&a[j * n + c].abs())
                    .unwrap()
            })
            .unwrap();
        if a[pivot_row * n + c].abs() < 1e-300 {
            return false;
        }
        if pivot_row != c {
            for k in 0..n {
                a.swap(c * n + k, pivot_row * n + k);
            }
            rhs.swap(c, pivot_row);
        }
        for r in c + 1..n {
            let f = a[r * n + c] / a[c * n + c];
            if f == 0.0 {
                continue;
            }
            for k in c..n {
                a[r * n + k] -= f * a[c * n + k];
            }
            rhs[r] -= f * rhs[c];
        }
    }
    for r in (0..n).rev() {
        let mut acc = rhs[r];
        for k in r + 1..n {
            acc -= a[r * n + k] * rhs[k];
        }
        rhs[r] = acc / a[r * n + r];
    }
    true
}

/// One basis function, stored as per-interval monomial coefficients in the
/// scaled variable `ts = (p_end - p)/scale`.
struct BasisFn {
    /// First grid interval covered.
    lo: usize,
    /// Coefficients `[a0, a1, a2, a3]` per covered interval.
    pieces: Vec<[f64; 4]>,
    scale: f64,
}

impl BasisFn {
    fn value(&self, interval: usize, ts: f64) -> f64 {
        let a = &self.pieces[interval - self.lo];
        let s = ts.max(0.0).sqrt();
        a[3].mul_add(ts * s, a[2].mul_add(ts * ts, a[1].mul_add(ts, a[0])))
    }

    /// Derivative with respect to p (not ts).
    fn deriv(&self, interval: usize, ts: f64) -> f64 {
        let a = &self.pieces[interval - self.lo];
        let s = ts.max(0.0).sqrt();
        -(1.5 * a[3]).mul_add(s, (2.0 * a[2]).mul_add(ts, a[1])) / self.scale
    }
}

/// Build one clamped basis function centered on grid index `k` (which runs
/// from -1 to n). `t` holds `p_end - p_i` for the whole grid.
fn build_one(k: isize, t: &[f64]) -> BasisFn {
    let n = t.len() as isize;
    let lo_c = (k - 2).max(0) as usize;
    let hi_c = (k + 2).min(n - 1) as usize;
    let tl = (lo_c as isize - (k - 2)) as usize;
    let tr = ((k + 2) - hi_c as isize) as usize;
    let m = hi_c - lo_c;
    let unknowns = 4 * m;

    let scale = t[lo_c..=hi_c]
        .iter()
        .fold(0.0_f64, |acc, &v| acc.max(v))
        .max(1e-30);
    let ts: Vec<f64> = t.iter().map(|&v| v / scale).collect();

    let mut a = vec![0.0; unknowns * unknowns];
    let mut rhs = vec![0.0; unknowns];
    let mut row = 0;

    // Row builders: coefficients of the four monomials {1, ts, ts^2,
    // ts^(3/2)} for a value, a p-derivative, or a sqrt(ts)-scaled second
    // derivative at ts.
    let value_row = |tsv: f64| {
        let s = tsv.max(0.0).sqrt();
        [1.0, tsv, tsv * tsv, tsv * s]
    };
    let deriv_row = |tsv: f64| {
        let s = tsv.max(0.0).sqrt();
        [0.0, 1.0, 2.0 * tsv, 1.5 * s]
    };
    let second_row = |tsv: f64| {
        let s = tsv.max(0.0).sqrt();
        [0.0, 0.0, 2.0 * s, 0.75]
    };

    let mut put = |a: &mut Vec<f64>,
                   rhs: &mut Vec<f64>,
                   row: &mut usize,
                   interval: usize,
                   coeffs: [f64; 4],
                   interval2: Option<usize>,
                   rhs_val: f64| {
        let base = 4 * (interval - lo_c);
        for (j, c) in coeffs.iter().enumerate() {
            a[*row * unknowns + base + j] += c;
        }
        if let Some(i2) = interval2 {
            let base2 = 4 * (i2 - lo_c);
            for (j, c) in coeffs.iter().enumerate() {
                a[*row * unknowns + base2 + j] -= c;
            }
        }
        rhs[*row] = rhs_val;
        *row += 1;
    };

    // End conditions: vanish to order (2 - truncation).
    for order in 0..3usize.saturating_sub(tl) {
        let r = match order {
            0 => value_row(ts[lo_c]),
            1 => deriv_row(ts[lo_c]),
            _ => second_row(ts[lo_c]),
        };
        put(&mut a, &mut rhs, &mut row, lo_c, r, None, 0.0);
    }
    for order in 0..3usize.saturating_sub(tr) {
        let r = match order {
            0 => value_row(ts[hi_c]),
            1 => deriv_row(ts[hi_c]),
            _ => second_row(ts[hi_c]),
        };
        put(&mut a, &mut rhs, &mut row, hi_c - 1, r, None, 0.0);
    }

    // C2 continuity at interior support knots.
    for q in lo_c + 1..hi_c {
        put(
            &mut a,
            &mut rhs,
            &mut row,
            q - 1,
            value_row(ts[q]),
            Some(q),
            0.0,
        );
        put(
            &mut a,
            &mut rhs,
            &mut row,
            q - 1,
            deriv_row(ts[q]),
            Some(q),
            0.0,
        );
        put(
            &mut a,
            &mut rhs,
            &mut row,
            q - 1,
            second_row(ts[q]),
            Some(q),
            0.0,
        );
    }

    // Normalization at the one grid point where the function is
    // structurally non-zero.
    let mut norm_idx = k.clamp(0, n - 1) as usize;
    if tl == 2 {
        norm_idx = lo_c + 1;
    }
    if tr == 2 {
        norm_idx = hi_c - 1;
    }
    let norm_interval = norm_idx.min(hi_c - 1).max(lo_c);
    put(
        &mut a,
        &mut rhs,
        &mut row,
        norm_interval,
        value_row(ts[norm_idx]),
        None,
        1.0,
    );

    debug_assert_eq!(row, unknowns);
    let ok = solve_dense(unknowns, &mut a, &mut rhs);
    debug_assert!(ok, "degenerate ray-parameter grid");

    let pieces = rhs.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect();
    BasisFn {
        lo: lo_c,
        pieces,
        scale,
    }
}

/// Evaluate `f` at grid knot `idx` picking an interval inside the support.
fn at_knot<F: Fn(usize, f64) -> f64>(f: F, b_lo: usize, b_hi: usize, idx: usize, ts: f64) -> f64 {
    let interval = idx.min(b_hi - 1).max(b_lo);
    f(interval, ts)
}

/// Build the five basis rows for a strictly increasing ray-parameter grid.
///
/// Column `i` holds the value contributions of the left and right
/// neighboring basis functions at `p_i` (rows 0 and 1, the diagonal being
/// normalized to one), followed by the three distance contributions
/// `-B'_{i-1}`, `-B'_i`, `-B'_{i+1}` (rows 2 to 4). The output depends only
/// on the grid.
#[must_use]
pub fn build_basis(p_grid: &[f64]) -> Array2<f64> {
    let n = p_grid.len();
    let mut basis = Array2::zeros((5, n));
    if n < 3 {
        return basis;
    }
    debug_assert!(p_grid.windows(2).all(|w| w[1] > w[0]));

    let p_end = p_grid[n - 1];
    let t: Vec<f64> = p_grid.iter().map(|&p| p_end - p).collect();

    for k in -1..=n as isize {
        let b = build_one(k, &t);
        let b_hi = b.lo + b.pieces.len();
        let ts_of = |i: usize| t[i] / b.scale;

        // basis[0][k+1] = B_k(p_{k+1}), basis[1][k-1] = B_k(p_{k-1}).
        if k + 1 >= 0 && ((k + 1) as usize) < n {
            let i = (k + 1) as usize;
            basis[[0, i]] = at_knot(|j, ts| b.value(j, ts), b.lo, b_hi, i, ts_of(i));
            basis[[2, i]] = -at_knot(|j, ts| b.deriv(j, ts), b.lo, b_hi, i, ts_of(i));
        }
        if k >= 0 && (k as usize) < n {
            let i = k as usize;
            basis[[3, i]] = -at_knot(|j, ts| b.deriv(j, ts), b.lo, b_hi, i, ts_of(i));
        }
        if k - 1 >= 0 && ((k - 1) as usize) < n {
            let i = (k - 1) as usize;
            basis[[1, i]] = at_knot(|j, ts| b.value(j, ts), b.lo, b_hi, i, ts_of(i));
            basis[[4, i]] = -at_knot(|j, ts| b.deriv(j, ts), b.lo, b_hi, i, ts_of(i));
        }
    }
    basis
}

/// Solve the collocation system for a branch and return the distance at
/// every grid point.
///
/// Interpolates the tau samples with the basis spline subject to the two
/// given endpoint distances, eliminating the penta-diagonal system forward
/// and back-substituting; interior distances come out of the three stored
/// derivative rows. The endpoints of the result are `x_first` and `x_last`
/// exactly.
#[must_use]
pub fn fit_distances(basis: &Array2<f64>, tau: &[f64], x_first: f64, x_last: f64) -> Vec<f64> {
    let n = tau.len();
    if n < 3 {
        return match n {
            2 => vec![x_first, x_last],
            1 => vec![x_first],
            _ => Vec::new(),
        };
    }
    debug_assert_eq!(basis.ncols(), n);

    let nn = n + 2;
    let mut a = vec![0.0; nn * nn];
    let mut rhs = vec![0.0; nn];

    // Row layout: tau_0, x_0, tau_1 .. tau_{n-2}, x_{n-1}, tau_{n-1};
    // unknown j is the coefficient g_{j-1}.
    let mut tau_row = |r: usize, i: usize, a: &mut Vec<f64>, rhs: &mut Vec<f64>| {
        let diag = if i == 0 || i == n - 1 { 0.0 } else { 1.0 };
        a[r * nn + i] = basis[[0, i]];
        a[r * nn + i + 1] = diag;
        a[r * nn + i + 2] = basis[[1, i]];
        rhs[r] = tau[i];
    };
    tau_row(0, 0, &mut a, &mut rhs);
    a[nn] = basis[[2, 0]];
    a[nn + 1] = basis[[3, 0]];
    a[nn + 2] = basis[[4, 0]];
    rhs[1] = x_first;
    for i in 1..=n - 2 {
        tau_row(i + 1, i, &mut a, &mut rhs);
    }
    let r = n;
    a[r * nn + n - 1] = basis[[2, n - 1]];
    a[r * nn + n] = basis[[3, n - 1]];
    a[r * nn + n + 1] = basis[[4, n - 1]];
    rhs[r] = x_last;
    tau_row(n + 1, n - 1, &mut a, &mut rhs);

    // Penta-diagonal forward elimination (band width two on both sides),
    // then back substitution.
    for c in 0..nn {
        for r in c + 1..nn.min(c + 3) {
            let f = a[r * nn + c] / a[c * nn + c];
            if f == 0.0 {
                continue;
            }
            for k in c..nn.min(c + 3) {
                a[r * nn + k] -= f * a[c * nn + k];
            }
            rhs[r] -= f * rhs[c];
        }
    }
    let mut g = vec![0.0; nn];
    for r in (0..nn).rev() {
        let mut acc = rhs[r];
        for k in r + 1..nn.min(r + 3) {
            acc -= a[r * nn + k] * g[k];
        }
        g[r] = acc / a[r * nn + r];
    }

    let mut x = vec![0.0; n];
    x[0] = x_first;
    x[n - 1] = x_last;
    for i in 1..n - 1 {
        x[i] = basis[[4, i]].mul_add(
            g[i + 2],
            basis[[2, i]].mul_add(g[i], basis[[3, i]] * g[i + 1]),
        );
    }
    x
}

/// Fit the cubic-in-sqrt coefficients of one interval, matched to tau and
/// distance at both ends. `dp` arguments are `p_end - p` with the left end
/// the larger value.
#[must_use]
pub fn fit_interval_poly(
    dp_left: f64,
    dp_right: f64,
    tau_left: f64,
    tau_right: f64,
    x_left: f64,
    x_right: f64,
) -> [f64; 4] {
    let mut a = [0.0; 16];
    let mut rhs = [tau_left, tau_right, x_left, x_right];
    let value = |dp: f64| {
        let s = dp.max(0.0).sqrt();
        [1.0, dp, dp * dp, dp * s]
    };
    let slope = |dp: f64| {
        let s = dp.max(0.0).sqrt();
        [0.0, 1.0, 2.0 * dp, 1.5 * s]
    };
    a[0..4].copy_from_slice(&value(dp_left));
    a[4..8].copy_from_slice(&value(dp_right));
    a[8..12].copy_from_slice(&slope(dp_left));
    a[12..16].copy_from_slice(&slope(dp_right));
    let ok = solve_dense(4, &mut a, &mut rhs);
    debug_assert!(ok, "degenerate branch interval");
    rhs
}

/// Evaluate interval tau at `dp = p_end - p`.
#[must_use]
pub fn poly_tau(a: &[f64; 4], dp: f64) -> f64 {
    let s = dp.max(0.0).sqrt();
    a[3].mul_add(dp * s, a[2].mul_add(dp * dp, a[1].mul_add(dp, a[0])))
}

/// Evaluate interval distance (`-dtau/dp`) at `dp`.
#[must_use]
pub fn poly_x(a: &[f64; 4], dp: f64) -> f64 {
    let s = dp.max(0.0).sqrt();
    (1.5 * a[3]).mul_add(s, (2.0 * a[2]).mul_add(dp, a[1]))
}

/// Evaluate `dx/dp` at `dp`, guarded near the singular branch end.
#[must_use]
pub fn poly_dxdp(a: &[f64; 4], dp: f64) -> f64 {
    let s = dp.max(0.0).sqrt().max(SPTOL);
    -(2.0_f64.mul_add(a[2], 0.75 * a[3] / s))
}
