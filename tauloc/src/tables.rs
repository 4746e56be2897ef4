//! Readers for the pre-computed model table files.
//!
//! `<model>.hed` is a little-endian sequential file of six length-framed
//! records: normalization and segment descriptions, the two model shells,
//! the up-going sampling grids, the branch table, the shared ray-parameter
//! grid with its surface-focus tau, and the spline basis. `<model>.tbl`
//! holds, per stored source depth, one P record then one S record with the
//! up-going tau and distance vectors; its record lengths count 4-byte
//! words rather than bytes, a Fortran leftover handled here and forgotten
//! afterward.

use byteorder::{LittleEndian, ReadBytesExt};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::branch::{AddOn, BranchRef};
use crate::error::{Error, Result};
use crate::model::{ModelConversions, ModelSample, ModelShell, WaveType};
use crate::phase::PhaseDesc;
use crate::upgoing::{UpGoingDepth, UpGoingRef};
use crate::volume::TravelTimeVolume;

/// Fixed Fortran dimension of the per-segment arrays in record one.
pub const JSEG: usize = 30;

/// Width of a blank-padded phase code field.
const CODE_BYTES: usize = 8;

/// Read one length-framed record. `word_lengths` selects the legacy
/// semantics where the frame counts 4-byte words instead of bytes.
fn read_record<R: Read>(reader: &mut R, word_lengths: bool) -> Result<Vec<u8>> {
    let head = reader.read_u32::<LittleEndian>()?;
    let bytes = if word_lengths { head * 4 } else { head };
    let mut payload = vec![0_u8; bytes as usize];
    reader.read_exact(&mut payload)?;
    let tail = reader.read_u32::<LittleEndian>()?;
    if tail != head {
        return Err(Error::TableIntegrity(format!(
            "record framing mismatch: head {head}, tail {tail}"
        )));
    }
    Ok(payload)
}

/// Cursor over one record payload.
struct Record<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Record<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn f64(&mut self) -> Result<f64> {
        let mut slice = self.data.get(self.pos..self.pos + 8).ok_or_else(|| {
            Error::TableIntegrity("record truncated reading a float".into())
        })?;
        self.pos += 8;
        Ok(slice.read_f64::<LittleEndian>()?)
    }

    fn i32(&mut self) -> Result<i32> {
        let mut slice = self.data.get(self.pos..self.pos + 4).ok_or_else(|| {
            Error::TableIntegrity("record truncated reading an integer".into())
        })?;
        self.pos += 4;
        Ok(slice.read_i32::<LittleEndian>()?)
    }

    fn index(&mut self) -> Result<usize> {
        let v = self.i32()?;
        usize::try_from(v)
            .map_err(|_| Error::TableIntegrity(format!("negative index {v} in table")))
    }

    fn f64_vec(&mut self, n: usize) -> Result<Vec<f64>> {
        (0..n).map(|_| self.f64()).collect()
    }

    fn code(&mut self) -> Result<String> {
        let slice = self
            .data
            .get(self.pos..self.pos + CODE_BYTES)
            .ok_or_else(|| Error::TableIntegrity("record truncated reading a code".into()))?;
        self.pos += CODE_BYTES;
        Ok(String::from_utf8_lossy(slice).trim_end().to_owned())
    }

    fn finished(&self) -> bool {
        self.pos == self.data.len()
    }
}

fn wave_from_code(code: i32) -> Result<WaveType> {
    match code {
        1 => Ok(WaveType::P),
        2 => Ok(WaveType::S),
        other => Err(Error::TableIntegrity(format!("bad wave-type code {other}"))),
    }
}

/// One segment description from record one.
#[derive(Clone, Copy, Debug)]
pub struct SegmentDesc {
    /// Wave types of the initial, down-going, and up-coming legs.
    pub wave_types: [WaveType; 3],
    /// Up-going correction sign.
    pub sign: i8,
    /// Traversal count.
    pub count: u32,
}

/// Everything read from a model header file.
#[derive(Clone, Debug)]
pub struct ModelHeader {
    /// Normalization and discontinuity constants.
    pub conversions: ModelConversions,
    /// P model shell.
    pub p_shell: ModelShell,
    /// S model shell.
    pub s_shell: ModelShell,
    /// P up-going grids `(p_tau_up, p_x_up)`.
    pub p_grids: (Vec<f64>, Vec<f64>),
    /// S up-going grids.
    pub s_grids: (Vec<f64>, Vec<f64>),
    /// Branch references.
    pub branches: Vec<BranchRef>,
    /// Stored depth counts of the companion depth file, P then S.
    pub depth_counts: (usize, usize),
}

/// Parse a `<model>.hed` stream.
///
/// # Errors
///
/// [`Error::TableIntegrity`] on framing or index inconsistencies,
/// [`Error::Io`] on truncated input.
#[allow(clippy::too_many_lines)]
pub fn read_header<R: Read>(reader: &mut R) -> Result<ModelHeader> {
    // Record 1: limits, normalization, segment descriptions.
    let rec = read_record(reader, false)?;
    let mut r = Record::new(&rec);
    let x_norm = r.f64()?;
    let p_norm = r.f64()?;
    let t_norm = r.f64()?;
    let r_surface = r.f64()?;
    let mut conversions = ModelConversions::new(x_norm, p_norm, t_norm, r_surface);
    conversions.upper_mantle_depth = r_surface - r.f64()?;
    conversions.moho_depth = r_surface - r.f64()?;
    conversions.conversion_depth = r_surface - r.f64()?;
    conversions.inner_core_depth = r_surface - r.f64()?;

    let n_seg = r.index()?;
    let n_brn = r.index()?;
    let depth_counts = (r.index()?, r.index()?);
    if n_seg > JSEG {
        return Err(Error::TableIntegrity(format!(
            "{n_seg} segments exceed the fixed dimension {JSEG}"
        )));
    }
    let mut segments = Vec::with_capacity(n_seg);
    for i in 0..JSEG {
        let w0 = r.i32()?;
        let w1 = r.i32()?;
        let w2 = r.i32()?;
        let sign = r.i32()?;
        let count = r.i32()?;
        if i < n_seg {
            segments.push(SegmentDesc {
                wave_types: [wave_from_code(w0)?, wave_from_code(w1)?, wave_from_code(w2)?],
                sign: i8::try_from(sign).map_err(|_| {
                    Error::TableIntegrity(format!("bad correction sign {sign}"))
                })?,
                count: u32::try_from(count).map_err(|_| {
                    Error::TableIntegrity(format!("bad traversal count {count}"))
                })?,
            });
        }
    }

    // Record 2: model shells.
    let rec = read_record(reader, false)?;
    let mut r = Record::new(&rec);
    let mut shells = Vec::with_capacity(2);
    for wave in [WaveType::P, WaveType::S] {
        let n = r.index()?;
        let mut samples = Vec::with_capacity(n);
        for _ in 0..n {
            samples.push(ModelSample {
                z: r.f64()?,
                p: r.f64()?,
                up_index: r.index()?,
            });
        }
        shells.push(ModelShell::new(wave, samples)?);
    }
    let s_shell = shells.pop().expect("two shells pushed");
    let p_shell = shells.pop().expect("two shells pushed");

    // Record 3: up-going sampling grids.
    let rec = read_record(reader, false)?;
    let mut r = Record::new(&rec);
    let n_tau_p = r.index()?;
    let n_x_p = r.index()?;
    let n_tau_s = r.index()?;
    let n_x_s = r.index()?;
    let p_grids = (r.f64_vec(n_tau_p)?, r.f64_vec(n_x_p)?);
    let s_grids = (r.f64_vec(n_tau_s)?, r.f64_vec(n_x_s)?);

    // Record 4: branch table (parsed after records 5 and 6 supply the
    // shared grid, so stash the raw payload).
    let branch_rec = read_record(reader, false)?;

    // Record 5: shared ray-parameter grid and surface-focus tau.
    let rec = read_record(reader, false)?;
    let mut r = Record::new(&rec);
    let n_spec = r.index()?;
    let p_spec = r.f64_vec(n_spec)?;
    let tau_spec = r.f64_vec(n_spec)?;

    // Record 6: basis coefficients, five rows per grid sample.
    let rec = read_record(reader, false)?;
    let mut r = Record::new(&rec);
    let basis_flat = r.f64_vec(5 * n_spec)?;

    // Now assemble the branches.
    let mut r = Record::new(&branch_rec);
    let mut branches = Vec::with_capacity(n_brn);
    for _ in 0..n_brn {
        let phase = r.code()?;
        let seg_index = r.index()?;
        let segment = *segments.get(seg_index).ok_or_else(|| {
            Error::TableIntegrity(format!("segment index {seg_index} out of range"))
        })?;
        let p_range = [r.f64()?, r.f64()?];
        let x_range = [r.f64()?, r.f64()?];
        let start = r.index()?;
        let end = r.index()?;
        let is_up_going = r.i32()? != 0;
        let has_diff = r.i32()? != 0;
        let diff_code = r.code()?;
        let x_diff = [r.f64()?, r.f64()?];
        let add_on = match r.i32()? {
            0 => None,
            1 => Some(AddOn::PkpPre),
            2 => Some(AddOn::PwP),
            3 => Some(AddOn::Lg),
            4 => Some(AddOn::Lr),
            other => {
                return Err(Error::TableIntegrity(format!("bad add-on code {other}")));
            }
        };

        if end < start || end >= n_spec {
            return Err(Error::TableIntegrity(format!(
                "branch grid range {start}..{end} outside the {n_spec}-sample grid"
            )));
        }

        let mut branch = if is_up_going {
            BranchRef::up_going(&phase, segment.wave_types[0])
        } else {
            let p = p_spec[start..=end].to_vec();
            let tau = tau_spec[start..=end].to_vec();
            let n = p.len();
            let mut basis = Array2::zeros((5, n));
            for row in 0..5 {
                for col in 0..n {
                    basis[[row, col]] = basis_flat[row * n_spec + start + col];
                }
            }
            BranchRef {
                phase: phase.clone(),
                segment: PhaseDesc::parse(&phase).segment,
                wave_types: segment.wave_types,
                sign: segment.sign,
                count: segment.count,
                p_range,
                x_range,
                p,
                tau,
                basis,
                is_up_going: false,
                diffracted: None,
                add_on: None,
            }
        };
        if has_diff {
            branch = branch.with_diffracted(&diff_code, x_diff[0], x_diff[1]);
        }
        branch.add_on = add_on;
        branches.push(branch);
    }
    if !r.finished() {
        return Err(Error::TableIntegrity(
            "trailing bytes after the branch table".into(),
        ));
    }

    Ok(ModelHeader {
        conversions,
        p_shell,
        s_shell,
        p_grids,
        s_grids,
        branches,
        depth_counts,
    })
}

/// Parse a `<model>.tbl` stream: per stored depth a P record then an S
/// record, each `[n_tau, n_x, tau..., x...]` framed in 4-byte words.
///
/// # Errors
///
/// [`Error::TableIntegrity`] on framing or length inconsistencies.
pub fn read_depth_tables<R: Read>(
    reader: &mut R,
    depth_counts: (usize, usize),
) -> Result<(Vec<UpGoingDepth>, Vec<UpGoingDepth>)> {
    let n = depth_counts.0.max(depth_counts.1);
    let mut p_depths = Vec::with_capacity(depth_counts.0);
    let mut s_depths = Vec::with_capacity(depth_counts.1);
    for i in 0..n {
        for (count, out) in [
            (depth_counts.0, &mut p_depths),
            (depth_counts.1, &mut s_depths),
        ] {
            if i >= count {
                continue;
            }
            let rec = read_record(reader, true)?;
            let mut r = Record::new(&rec);
            let n_tau = r.index()?;
            let n_x = r.index()?;
            let entry = UpGoingDepth {
                tau: r.f64_vec(n_tau)?,
                x: r.f64_vec(n_x)?,
            };
            if !r.finished() {
                return Err(Error::TableIntegrity(format!(
                    "depth record {i} has trailing bytes"
                )));
            }
            out.push(entry);
        }
    }
    Ok((p_depths, s_depths))
}

/// Load a complete travel-time volume from a header and depth file pair.
///
/// # Errors
///
/// Propagates reader failures; see [`read_header`] and
/// [`read_depth_tables`].
pub fn load_volume<P: AsRef<Path>>(
    hed_path: P,
    tbl_path: P,
    shallow_limit_km: f64,
) -> Result<TravelTimeVolume> {
    let mut hed = BufReader::new(File::open(hed_path)?);
    let header = read_header(&mut hed)?;
    let mut tbl = BufReader::new(File::open(tbl_path)?);
    let (p_depths, s_depths) = read_depth_tables(&mut tbl, header.depth_counts)?;

    let p_up = UpGoingRef::new(
        WaveType::P,
        header.p_grids.0,
        header.p_grids.1,
        p_depths,
        shallow_limit_km,
    )?;
    let s_up = UpGoingRef::new(
        WaveType::S,
        header.s_grids.0,
        header.s_grids.1,
        s_depths,
        shallow_limit_km,
    )?;
    Ok(TravelTimeVolume::new(
        header.conversions,
        header.p_shell,
        header.s_shell,
        p_up,
        s_up,
        header.branches,
    ))
}
