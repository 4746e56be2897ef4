//! End-to-end exercise of the engine on a synthetic earth model: build a
//! volume from the integrator itself, open a session, generate picks from
//! the session's own theoretical times, and check that identification and
//! the summary reporting recover them.

use float_cmp::assert_approx_eq;
use tauloc::auxiliary::AuxTtRef;
use tauloc::branch::BranchRef;
use tauloc::event::{AuthorType, Event, Hypocenter, Pick, Station};
use tauloc::integrate;
use tauloc::model::{ModelConversions, ModelSample, ModelShell, WaveType};
use tauloc::phase_id::PhaseIdentifier;
use tauloc::request::LocationResult;
use tauloc::upgoing::UpGoingRef;
use tauloc::volume::{SessionOptions, TravelTimeVolume};

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

/// Surface-focus branch integrated directly from a shell: the two-way tau
/// and distance of rays bottoming between consecutive slowness samples.
fn surface_branch(shell: &ModelShell, phase: &str, wave: WaveType, sign: i8) -> BranchRef {
    let samples = shell.samples();
    let prof: Vec<(f64, f64)> = samples.iter().map(|s| (s.p, s.z)).collect();
    let p_bottom = samples.last().unwrap().p;
    let p_top = samples[0].p;
    let n = 25;

    let mut p = Vec::with_capacity(n);
    let mut tau = Vec::with_capacity(n);
    let mut x_first = 0.0;
    let mut x_last = 0.0;
    for i in 0..n {
        let pi = p_bottom + (p_top - p_bottom) * (i as f64) / ((n - 1) as f64);
        let one_way = integrate::profile(pi, &prof).unwrap();
        p.push(pi);
        tau.push(2.0 * one_way.tau);
        if i == 0 {
            x_first = 2.0 * one_way.dist;
        }
        if i == n - 1 {
            x_last = 2.0 * one_way.dist;
        }
    }
    BranchRef::new(phase, [wave; 3], sign, 1, p, tau, [x_first, x_last])
}

fn build_volume() -> TravelTimeVolume {
    let cvt = conversions();
    let (p_shell, s_shell) = shells(&cvt);
    let p_grid: Vec<f64> = (0..=50).map(|i| 0.02 * f64::from(i)).collect();
    let s_grid: Vec<f64> = (0..=50).map(|i| 0.036 * f64::from(i)).collect();
    let p_ends = vec![0.2, 0.4, 0.6, 0.66, 0.78, 0.88, 0.94, 1.0];
    let s_ends = vec![0.4, 0.8, 1.2, 1.42, 1.6, 1.7, 1.8];
    let p_up = UpGoingRef::generate(&p_shell, p_grid, p_ends, 35.0).unwrap();
    let s_up = UpGoingRef::generate(&s_shell, s_grid, s_ends, 35.0).unwrap();

    let branches = vec![
        surface_branch(&p_shell, "P", WaveType::P, -1),
        surface_branch(&p_shell, "pP", WaveType::P, 1),
        surface_branch(&s_shell, "S", WaveType::S, -1),
    ];
    TravelTimeVolume::new(cvt, p_shell, s_shell, p_up, s_up, branches)
}

/// Distance coverage of a corrected branch in degrees.
fn coverage(session: &tauloc::volume::TravelTimeSession<'_>, index: usize) -> (f64, f64) {
    let x = &session.corrected()[index].x;
    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lo.to_degrees(), hi.to_degrees())
}

#[test]
fn picks_made_from_theory_identify_and_summarize() {
    let volume = build_volume();
    let aux = AuxTtRef::standard();
    let depth = 200.0;
    let origin_time = 1_217_617_551.88;

    let session = volume
        .new_session(Some(&aux), depth, SessionOptions::default())
        .unwrap();

    // Stations on the equator east of the source: distance equals the
    // longitude offset exactly, azimuth is 90 degrees.
    let (lo, hi) = coverage(&session, 0);
    let deltas = [
        0.35_f64.mul_add(hi - lo, lo),
        f64::midpoint(lo, hi),
        0.65_f64.mul_add(hi - lo, lo),
    ];

    let mut picks = Vec::new();
    let noise = 0.3;
    for (i, &delta) in deltas.iter().enumerate() {
        let theory = session
            .get_tt_at_azimuth(delta, 90.0, false)
            .into_iter()
            .find(|a| a.phase == "P")
            .unwrap();
        picks.push(Pick {
            db_id: format!("{i}"),
            station: Station {
                code: format!("ST{i:02}"),
                network: "XX".into(),
                location: "00".into(),
                lat: 0.0,
                lon: delta,
                elev: 0.0,
            },
            channel: "BHZ".into(),
            arrival_time: origin_time + theory.time + noise,
            quality: 0.9,
            use_flag: true,
            observed_phase: "P".into(),
            current_phase: "P".into(),
            author: AuthorType::AutomaticNonLocal,
            affinity: 1.0,
            delta: 0.0,
            azimuth: 0.0,
            residual: None,
            travel_time: None,
            fom: None,
        });
    }

    let mut event = Event {
        hypo: Hypocenter {
            origin_time,
            lat: 0.0,
            lon: 0.0,
            depth,
            held_location: false,
            held_depth: false,
            analyst_depth: false,
            bayesian_depth: 0.0,
            bayesian_spread: 0.0,
            rstt: false,
            no_svd: false,
        },
        picks,
    };
    event.update(true);
    event.sort_picks();

    let identifier = PhaseIdentifier::new(&aux.groups);
    let identified = identifier.identify_event(&mut event, &session);
    assert_eq!(identified, 3);

    for pick in &event.picks {
        assert_eq!(pick.current_phase, "P", "station {}", pick.station.code);
        let residual = pick.residual.unwrap();
        // The identified residual is the planted noise, up to the session's
        // own interpolation differences between the query distances.
        assert_approx_eq!(f64, residual, noise, epsilon = 1e-3);
    }

    let summary = LocationResult::summarize(&event);
    assert_eq!(summary.used_phases, 3);
    assert_eq!(summary.used_stations, 3);
    assert_approx_eq!(f64, summary.rms, noise, epsilon = 1e-3);
    // All stations to the east: the gap wraps around the other side.
    assert!(summary.gap > 270.0);
    assert_approx_eq!(f64, summary.minimum_distance, deltas[0], epsilon = 1e-6);
}

#[test]
fn reference_data_is_shared_between_sessions() {
    let volume = build_volume();
    let shallow = volume
        .new_session(None, 100.0, SessionOptions::default())
        .unwrap();
    let deep = volume
        .new_session(None, 420.0, SessionOptions::default())
        .unwrap();

    // Both sessions live at once on one volume and answer queries
    // independently.
    let (lo_a, hi_a) = coverage(&shallow, 0);
    let (lo_b, hi_b) = coverage(&deep, 0);
    let da = f64::midpoint(lo_a, hi_a);
    let db = f64::midpoint(lo_b, hi_b);
    assert!(!shallow.get_tt(da, true).is_empty());
    assert!(!deep.get_tt(db, true).is_empty());

    // Deeper sessions truncate the direct branch at a smaller slowness.
    let p_a = *shallow.corrected()[0].p.last().unwrap();
    let p_b = *deep.corrected()[0].p.last().unwrap();
    assert!(p_b < p_a);
}

#[test]
fn depth_phases_trail_their_direct_phase_everywhere() {
    let volume = build_volume();
    let session = volume
        .new_session(None, 300.0, SessionOptions::default())
        .unwrap();

    let (p_lo, p_hi) = coverage(&session, 0);
    let (q_lo, q_hi) = coverage(&session, 1);
    let lo = p_lo.max(q_lo);
    let hi = p_hi.min(q_hi);
    assert!(lo < hi);

    for f in [0.25f64, 0.5, 0.75] {
        let delta = f.mul_add(hi - lo, lo);
        let arrivals = session.get_tt(delta, true);
        let p = arrivals.iter().find(|a| a.phase == "P");
        let pp = arrivals.iter().find(|a| a.phase == "pP");
        if let (Some(p), Some(pp)) = (p, pp) {
            assert!(pp.time > p.time, "pP before P at {delta} deg");
        }
    }
}
