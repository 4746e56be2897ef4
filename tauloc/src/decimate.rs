//! Grid thinning for the up-going ray-parameter samples.
//!
//! Surface-focus grids are far denser than a deep-source branch needs. The
//! decimation keeps just enough samples that the distances of successive
//! points, estimated from a three-point derivative of tau with respect to
//! p, stay about `x_min` apart.

/// Estimate `x = -dtau/dp` at every grid point.
///
/// Interior points use the non-uniform three-point formula, the ends the
/// one-sided slope of their single neighboring interval.
#[must_use]
pub fn estimate_distances(p: &[f64], tau: &[f64]) -> Vec<f64> {
    let n = p.len();
    assert_eq!(n, tau.len());
    if n < 2 {
        return vec![0.0; n];
    }

    let mut x = vec![0.0; n];
    x[0] = -(tau[1] - tau[0]) / (p[1] - p[0]);
    x[n - 1] = -(tau[n - 1] - tau[n - 2]) / (p[n - 1] - p[n - 2]);
    for i in 1..n - 1 {
        let h1 = p[i] - p[i - 1];
        let h2 = p[i + 1] - p[i];
        let slope = (-h2 / (h1 * (h1 + h2))).mul_add(
            tau[i - 1],
            ((h2 - h1) / (h1 * h2)).mul_add(tau[i], h1 / (h2 * (h1 + h2)) * tau[i + 1]),
        );
        x[i] = -slope;
    }
    x
}

/// Mark the samples of a `(p, tau)` grid to keep so that successive kept
/// distances differ by at least roughly `x_min`.
///
/// The scan runs from the end backward. Points falling inside the current
/// gap are marked for deletion while the one closest to the spacing target
/// is remembered; once the gap opens past `x_min`, whichever of the
/// remembered candidate and the current point lies closest to the target
/// survives and becomes the new anchor. Both endpoints always survive.
#[must_use]
pub fn thin_grid(p: &[f64], tau: &[f64], x_min: f64) -> Vec<bool> {
    let n = p.len();
    let mut keep = vec![true; n];
    if n <= 2 || x_min <= 0.0 {
        return keep;
    }

    let x = estimate_distances(p, tau);

    let mut anchor = n - 1;
    let mut best: Option<(usize, f64)> = None;
    let mut j = n - 2;
    while j >= 1 {
        let gap = (x[j] - x[anchor]).abs();
        let score = (gap - x_min).abs();
        if gap < x_min {
            keep[j] = false;
            if best.is_none_or(|(_, s)| score < s) {
                best = Some((j, score));
            }
            j -= 1;
        } else {
            let chosen = match best {
                Some((bj, bs)) if bs <= score => bj,
                _ => j,
            };
            keep[chosen] = true;
            anchor = chosen;
            best = None;
            if chosen == j {
                j -= 1;
            }
            // Otherwise re-examine j against the resurrected anchor.
        }
    }
    keep
}

/// Apply a keep-mask produced by [`thin_grid`] to a sample vector.
#[must_use]
pub fn apply_mask<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter_map(|(&v, &k)| k.then_some(v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn derivative_estimate_is_exact_for_quadratics() {
        // tau = 3 - p^2 has x = -dtau/dp = 2p, exactly reproduced by the
        // three-point formula at interior points.
        let p: Vec<f64> = (0..20).map(|i| 0.05 * f64::from(i)).collect();
        let tau: Vec<f64> = p.iter().map(|&p| 3.0 - p * p).collect();
        let x = estimate_distances(&p, &tau);
        for i in 1..p.len() - 1 {
            assert_approx_eq!(f64, x[i], 2.0 * p[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn endpoints_always_survive() {
        let p: Vec<f64> = (0..50).map(|i| 0.01 * f64::from(i)).collect();
        let tau: Vec<f64> = p.iter().map(|&p| 1.0 - p * p).collect();
        let keep = thin_grid(&p, &tau, 0.3);
        assert!(keep[0]);
        assert!(keep[p.len() - 1]);
    }

    #[test]
    fn kept_samples_respect_the_spacing_target() {
        let p: Vec<f64> = (0..100).map(|i| 0.01 * f64::from(i)).collect();
        let tau: Vec<f64> = p.iter().map(|&p| 2.0 - p * p).collect();
        let x_min = 0.25;
        let keep = thin_grid(&p, &tau, x_min);
        let x = estimate_distances(&p, &tau);

        let kept: Vec<usize> = (0..p.len()).filter(|&i| keep[i]).collect();
        assert!(kept.len() < p.len());
        // Interior kept points are spaced near or above the target; the
        // first interval may be short because the scan anchors at the end.
        for w in kept.windows(2).skip(1) {
            let gap = (x[w[1]] - x[w[0]]).abs();
            assert!(
                gap >= 0.5 * x_min,
                "gap {gap} far below target between {} and {}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn dense_grid_with_huge_target_collapses_to_ends() {
        let p: Vec<f64> = (0..30).map(|i| 0.01 * f64::from(i)).collect();
        let tau: Vec<f64> = p.iter().map(|&p| 1.0 - 0.5 * p * p).collect();
        let keep = thin_grid(&p, &tau, 1e6);
        let survivors = keep.iter().filter(|&&k| k).count();
        assert!(survivors <= 3);
    }

    #[test]
    fn mask_application_filters_in_order() {
        let keep = [true, false, true, false, true];
        assert_eq!(apply_mask(&[1, 2, 3, 4, 5], &keep), vec![1, 3, 5]);
    }
}
