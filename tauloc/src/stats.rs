//! Per-phase travel-time statistics: bias, spread, and observability as
//! piecewise-linear functions of distance.
//!
//! The raw input is 1-degree binned observations with optional break flags.
//! Each maximal run between breaks gets a least-squares line, and adjacent
//! lines are patched so that their boundary sits at the actual
//! intersection, keeping the lookup continuous across segments.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

use crate::convert;
use crate::error::{Error, Result};

/// Bias fallback in seconds.
pub const DEF_BIAS: f64 = 0.0;
/// Spread fallback in seconds.
pub const DEF_SPREAD: f64 = 12.0;
/// Observability fallback.
pub const DEF_OBSERV: f64 = 0.0;

/// One raw statistics bin.
#[derive(Clone, Copy, Debug)]
pub struct RawBin {
    /// Bin center distance in degrees.
    pub delta: f64,
    /// Observed value; `NaN` marks an empty bin.
    pub value: f64,
    /// Closes the current fit segment at this bin.
    pub break_flag: bool,
}

/// One fitted linear segment.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct StatSegment {
    /// Lower distance bound in degrees.
    pub min_delta: f64,
    /// Upper distance bound in degrees.
    pub max_delta: f64,
    /// Slope in value units per degree.
    pub slope: f64,
    /// Intercept at zero degrees.
    pub offset: f64,
}

impl StatSegment {
    fn value_at(&self, delta: f64) -> f64 {
        self.slope.mul_add(delta, self.offset)
    }
}

/// A piecewise-linear statistics curve.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StatCurve {
    segments: Vec<StatSegment>,
}

fn linear_fit(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    if n == 1 {
        return (0.0, points[0].1);
    }
    let nf = convert::f64_from_usize(n);
    let sx: f64 = points.iter().map(|p| p.0).sum();
    let sy: f64 = points.iter().map(|p| p.1).sum();
    let sxx: f64 = points.iter().map(|p| p.0 * p.0).sum();
    let sxy: f64 = points.iter().map(|p| p.0 * p.1).sum();
    let det = nf.mul_add(sxx, -(sx * sx));
    if det.abs() < 1e-12 {
        return (0.0, sy / nf);
    }
    let slope = nf.mul_add(sxy, -(sx * sy)) / det;
    let offset = (sy - slope * sx) / nf;
    (slope, offset)
}

impl StatCurve {
    /// Fit a curve from raw bins. Breaks close segments, empty (`NaN`) bins
    /// are skipped within their segment, and adjacent segment boundaries
    /// are moved to the intersection of the fitted lines.
    #[must_use]
    pub fn fit(bins: &[RawBin]) -> Self {
        let mut segments = Vec::new();
        let mut start = 0;
        for (i, bin) in bins.iter().enumerate() {
            let last = i + 1 == bins.len();
            if bin.break_flag || last {
                let run = &bins[start..=i];
                let points: Vec<(f64, f64)> = run
                    .iter()
                    .filter(|b| !b.value.is_nan())
                    .map(|b| (b.delta, b.value))
                    .collect();
                if !points.is_empty() {
                    let (slope, offset) = linear_fit(&points);
                    segments.push(StatSegment {
                        min_delta: run[0].delta,
                        max_delta: run[run.len() - 1].delta,
                        slope,
                        offset,
                    });
                }
                start = i + 1;
            }
        }

        // Patch interior boundaries to the line-line intersections.
        for i in 1..segments.len() {
            let (a, b) = (segments[i - 1], segments[i]);
            if (a.slope - b.slope).abs() > 1e-12 {
                let crossing = (b.offset - a.offset) / (a.slope - b.slope);
                if crossing > a.min_delta && crossing < b.max_delta {
                    segments[i - 1].max_delta = crossing;
                    segments[i].min_delta = crossing;
                }
            } else {
                let shared = f64::midpoint(a.max_delta, b.min_delta);
                segments[i - 1].max_delta = shared;
                segments[i].min_delta = shared;
            }
        }
        Self { segments }
    }

    /// Evaluate the curve, or fall back to `default` outside its coverage.
    #[must_use]
    pub fn value_or(&self, delta: f64, default: f64) -> f64 {
        self.segments
            .iter()
            .find(|s| delta >= s.min_delta && delta <= s.max_delta)
            .map_or(default, |s| s.value_at(delta))
    }

    /// The fitted segments.
    #[must_use]
    pub fn segments(&self) -> &[StatSegment] {
        &self.segments
    }
}

/// Statistics of one phase.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PhaseStats {
    /// Smallest covered distance in degrees.
    pub min_delta: f64,
    /// Largest covered distance in degrees.
    pub max_delta: f64,
    /// Travel-time bias in seconds.
    pub bias: StatCurve,
    /// Residual spread in seconds.
    pub spread: StatCurve,
    /// Relative number of times the phase is observed.
    pub observability: StatCurve,
}

/// The statistics of all phases, keyed by phase code.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TtStats {
    phases: FxHashMap<String, PhaseStats>,
}

impl TtStats {
    /// Look up one phase.
    #[must_use]
    pub fn get(&self, phase: &str) -> Option<&PhaseStats> {
        self.phases.get(phase)
    }

    /// Bias in seconds, defaulting when the phase or distance is unknown.
    #[must_use]
    pub fn bias(&self, phase: &str, delta: f64) -> f64 {
        self.phases
            .get(phase)
            .map_or(DEF_BIAS, |s| s.bias.value_or(delta, DEF_BIAS))
    }

    /// Spread in seconds, defaulting when the phase or distance is unknown.
    #[must_use]
    pub fn spread(&self, phase: &str, delta: f64) -> f64 {
        self.phases
            .get(phase)
            .map_or(DEF_SPREAD, |s| s.spread.value_or(delta, DEF_SPREAD))
    }

    /// Observability, defaulting when the phase or distance is unknown.
    #[must_use]
    pub fn observability(&self, phase: &str, delta: f64) -> f64 {
        self.phases
            .get(phase)
            .map_or(DEF_OBSERV, |s| s.observability.value_or(delta, DEF_OBSERV))
    }

    /// Insert one phase (used by the readers and tests).
    pub fn insert(&mut self, phase: String, stats: PhaseStats) {
        self.phases.insert(phase, stats);
    }

    /// Parse a statistics file: per phase a `code min max` header followed
    /// by one row per 1-degree bin holding the distance and the three
    /// values, each value optionally trailed by a `*` break flag.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TableIntegrity`] on malformed rows.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut stats = Self::default();
        let mut header: Option<(String, f64, f64)> = None;
        let mut bins: [Vec<RawBin>; 3] = [Vec::new(), Vec::new(), Vec::new()];

        let mut flush = |header: &mut Option<(String, f64, f64)>, bins: &mut [Vec<RawBin>; 3]| {
            if let Some((code, min_delta, max_delta)) = header.take() {
                stats.insert(
                    code,
                    PhaseStats {
                        min_delta,
                        max_delta,
                        bias: StatCurve::fit(&bins[0]),
                        spread: StatCurve::fit(&bins[1]),
                        observability: StatCurve::fit(&bins[2]),
                    },
                );
            }
            for b in bins.iter_mut() {
                b.clear();
            }
        };

        for line in reader.lines() {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens[0].parse::<f64>().is_err() {
                // New phase header.
                flush(&mut header, &mut bins);
                if tokens.len() != 3 {
                    return Err(Error::TableIntegrity(format!(
                        "bad statistics header: {line}"
                    )));
                }
                header = Some((
                    tokens[0].to_owned(),
                    parse_f64(tokens[1])?,
                    parse_f64(tokens[2])?,
                ));
                continue;
            }
            if header.is_none() {
                return Err(Error::TableIntegrity(
                    "statistics data before any phase header".into(),
                ));
            }
            let delta = parse_f64(tokens[0])?;
            let mut pos = 1;
            for bin in &mut bins {
                let Some(tok) = tokens.get(pos) else {
                    return Err(Error::TableIntegrity(format!(
                        "truncated statistics row: {line}"
                    )));
                };
                let value = parse_f64(tok)?;
                pos += 1;
                let break_flag = tokens.get(pos) == Some(&"*");
                if break_flag {
                    pos += 1;
                }
                bin.push(RawBin {
                    delta,
                    value,
                    break_flag,
                });
            }
        }
        flush(&mut header, &mut bins);
        Ok(stats)
    }
}

fn parse_f64(token: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| Error::TableIntegrity(format!("bad number in statistics file: {token}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn bins(rows: &[(f64, f64, bool)]) -> Vec<RawBin> {
        rows.iter()
            .map(|&(delta, value, break_flag)| RawBin {
                delta,
                value,
                break_flag,
            })
            .collect()
    }

    #[test]
    fn exact_linear_data_is_recovered() {
        let line = |d: f64| 0.4_f64.mul_add(d, 1.5);
        let data = bins(&[
            (1.0, line(1.0), false),
            (2.0, line(2.0), false),
            (3.0, line(3.0), false),
            (4.0, line(4.0), false),
        ]);
        let curve = StatCurve::fit(&data);
        assert_eq!(curve.segments().len(), 1);
        assert_approx_eq!(f64, curve.segments()[0].slope, 0.4, epsilon = 1e-10);
        assert_approx_eq!(f64, curve.segments()[0].offset, 1.5, epsilon = 1e-10);
    }

    #[test]
    fn nan_bins_are_skipped() {
        let data = bins(&[
            (1.0, 2.0, false),
            (2.0, f64::NAN, false),
            (3.0, 4.0, false),
        ]);
        let curve = StatCurve::fit(&data);
        assert_approx_eq!(f64, curve.value_or(2.0, 0.0), 3.0, epsilon = 1e-10);
    }

    #[test]
    fn break_flags_split_segments_at_the_intersection() {
        // First run on y = d, second on y = 10 - d: they cross at d = 5,
        // between the nominal boundary bins 4 and 6.
        let data = bins(&[
            (1.0, 1.0, false),
            (2.0, 2.0, false),
            (3.0, 3.0, false),
            (4.0, 4.0, true),
            (6.0, 4.0, false),
            (7.0, 3.0, false),
            (8.0, 2.0, false),
        ]);
        let curve = StatCurve::fit(&data);
        assert_eq!(curve.segments().len(), 2);
        assert_approx_eq!(f64, curve.segments()[0].max_delta, 5.0, epsilon = 1e-9);
        assert_approx_eq!(f64, curve.segments()[1].min_delta, 5.0, epsilon = 1e-9);
        // Continuity across the patched boundary.
        assert_approx_eq!(
            f64,
            curve.segments()[0].value_at(5.0),
            curve.segments()[1].value_at(5.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn defaults_cover_unknown_phases_and_distances() {
        let stats = TtStats::default();
        assert_approx_eq!(f64, stats.bias("XX", 30.0), DEF_BIAS, epsilon = 0.0);
        assert_approx_eq!(f64, stats.spread("XX", 30.0), DEF_SPREAD, epsilon = 0.0);
        assert_approx_eq!(f64, stats.observability("XX", 30.0), DEF_OBSERV, epsilon = 0.0);
    }

    #[test]
    fn file_blocks_parse_with_break_markers() {
        let text = "\
P 0.0 100.0
1.0 0.1 2.0 * 100.0
2.0 0.2 2.5 200.0
3.0 0.3 3.0 300.0
Pn 1.0 15.0
1.0 0.5 1.5 50.0
2.0 0.6 1.6 60.0
";
        let stats = TtStats::from_reader(text.as_bytes()).unwrap();
        let p = stats.get("P").unwrap();
        assert_approx_eq!(f64, p.max_delta, 100.0, epsilon = 0.0);
        // The spread broke after the first bin: two segments.
        assert_eq!(p.spread.segments().len(), 2);
        assert_eq!(p.bias.segments().len(), 1);
        assert!(stats.get("Pn").is_some());
        assert_approx_eq!(f64, stats.observability("Pn", 1.0), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn truncated_rows_are_integrity_errors() {
        let text = "P 0.0 10.0\n1.0 0.1 2.0\n";
        assert!(matches!(
            TtStats::from_reader(text.as_bytes()),
            Err(Error::TableIntegrity(_))
        ));
    }
}
