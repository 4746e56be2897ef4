use anyhow::{Context, Result};
use prettytable::Table;
use prettytable::format::{FormatBuilder, LinePosition, LineSeparator};
use tauloc::auxiliary::{AuxTtRef, TablePaths};
use tauloc::tables;
use tauloc::volume::TravelTimeVolume;

pub use crate::{GlobalConfiguration, Subcommand};

/// Load the travel-time volume named by the global configuration.
pub fn load_volume(cfg: &GlobalConfiguration) -> Result<TravelTimeVolume> {
    let hed = cfg.table_dir.join(format!("{}.hed", cfg.model));
    let tbl = cfg.table_dir.join(format!("{}.tbl", cfg.model));
    tables::load_volume(&hed, &tbl, cfg.shallow_limit)
        .with_context(|| format!("loading model {} from {}", cfg.model, cfg.table_dir.display()))
}

/// Load the auxiliary tables that exist in the table directory; missing
/// files fall back to built-in defaults.
pub fn load_aux(cfg: &GlobalConfiguration) -> Result<AuxTtRef> {
    let optional = |name: &str| {
        let path = cfg.table_dir.join(name);
        path.exists().then_some(path)
    };
    let paths = TablePaths {
        groups: optional("phgrp.dat"),
        stats: optional("ttstats.lis"),
        ellipticity: optional("tau.table"),
        topography: optional("ETOPObase.smth"),
    };
    Ok(AuxTtRef::load(&paths)?)
}

pub fn create_table() -> Table {
    let mut table = Table::new();
    table.set_format(
        FormatBuilder::new()
            .column_separator(' ')
            .separator(LinePosition::Title, LineSeparator::new('-', '+', ' ', ' '))
            .build(),
    );
    table
}
