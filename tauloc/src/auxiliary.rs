//! Auxiliary reference data: phase groups, statistics, ellipticity, and
//! topography, loaded once and shared read-only.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use tracing::debug;

use crate::ellip::Ellipticity;
use crate::error::Result;
use crate::phase::PhaseGroups;
use crate::stats::TtStats;
use crate::topo::Topography;

/// Explicit locations of the auxiliary files. Replaces the legacy static
/// table paths.
#[derive(Clone, Debug, Default)]
pub struct TablePaths {
    /// Phase group definitions (`phgrp.dat`).
    pub groups: Option<PathBuf>,
    /// Phase statistics (`ttstats.lis`).
    pub stats: Option<PathBuf>,
    /// Ellipticity tables (`tau.table`).
    pub ellipticity: Option<PathBuf>,
    /// Global relief grid (`ETOPObase.smth`).
    pub topography: Option<PathBuf>,
}

/// The auxiliary data bundle shared by all sessions.
#[derive(Clone, Debug)]
pub struct AuxTtRef {
    /// Phase groups and categorical flags.
    pub groups: PhaseGroups,
    /// Per-phase bias, spread, and observability.
    pub stats: TtStats,
    /// Ellipticity corrections.
    pub ellipticity: Ellipticity,
    /// Global relief, when loaded.
    pub topography: Option<Topography>,
}

impl AuxTtRef {
    /// Built-in groups, empty statistics and ellipticity, no topography.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            groups: PhaseGroups::standard(),
            stats: TtStats::default(),
            ellipticity: Ellipticity::default(),
            topography: None,
        }
    }

    /// Load the auxiliary files named in `paths`; anything not named falls
    /// back to its built-in or empty default.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::error::Error::TableIntegrity`] or
    /// [`crate::error::Error::Io`] when a named file is unreadable or
    /// malformed.
    pub fn load(paths: &TablePaths) -> Result<Self> {
        let mut aux = Self::standard();
        if let Some(path) = &paths.groups {
            aux.groups = PhaseGroups::from_reader(BufReader::new(File::open(path)?))?;
        }
        if let Some(path) = &paths.stats {
            aux.stats = TtStats::from_reader(BufReader::new(File::open(path)?))?;
        }
        if let Some(path) = &paths.ellipticity {
            aux.ellipticity = Ellipticity::from_reader(BufReader::new(File::open(path)?))?;
        }
        if let Some(path) = &paths.topography {
            aux.topography = Some(Topography::from_reader(BufReader::new(File::open(path)?))?);
        }
        debug!("auxiliary tables loaded");
        Ok(aux)
    }
}
