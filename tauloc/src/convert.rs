//! Lossless-enough numeric casts used by the table readers and fits.

/// Truncate a non-negative float to an index.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn usize_from_f64(x: f64) -> usize {
    debug_assert!(x >= 0.0);
    x.max(0.0) as usize
}

/// Exact conversion of a table-sized count to a float.
pub fn f64_from_usize(x: usize) -> f64 {
    f64::from(u32::try_from(x).expect("table dimensions fit in 32 bits"))
}
