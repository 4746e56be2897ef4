//! Error type shared by the travel-time engine and the table readers.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A request parameter fell outside the range covered by the loaded
    /// tables. The session that produced it is unusable.
    #[error("input out of table range: {0}")]
    InputRange(String),
    /// A table file is truncated, has mismatched record lengths, or contains
    /// indices pointing outside its own arrays. Fatal at load time.
    #[error("table integrity: {0}")]
    TableIntegrity(String),
    /// A layer integral produced a negative tau or distance outside
    /// tolerance, which indicates a corrupted model.
    #[error("numerical failure: {0}")]
    Numerical(String),
    /// I/O failure while reading a table file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
