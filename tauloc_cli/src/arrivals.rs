use super::helpers::{self, GlobalConfiguration, Subcommand};
use anyhow::Result;
use clap::Parser;
use prettytable::row;
use std::process::ExitCode;
use tauloc::volume::SessionOptions;

/// Compute theoretical arrivals for one source depth.
#[derive(Parser)]
pub struct Opts {
    /// Source depth in kilometers.
    #[arg(long, value_name = "KM")]
    depth: f64,
    /// Epicentral distances in degrees.
    #[arg(required = true, value_name = "DEG")]
    distances: Vec<f64>,
    /// Include phases not usable in a location.
    #[arg(long)]
    all: bool,
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let volume = helpers::load_volume(cfg)?;
        let aux = helpers::load_aux(cfg)?;
        let session = volume.new_session(Some(&aux), self.depth, SessionOptions::default())?;

        for &distance in &self.distances {
            let arrivals = session.get_tt(distance, self.all);
            println!("delta = {distance} deg, depth = {} km", self.depth);

            let mut table = helpers::create_table();
            table.set_titles(row![
                "phase",
                r->"tt (s)",
                r->"dT/dD (s/deg)",
                r->"dT/dh (s/km)",
                r->"spread (s)",
                r->"observ"
            ]);
            for arrival in &arrivals {
                table.add_row(row![
                    arrival.phase,
                    r->format!("{:.2}", arrival.time),
                    r->format!("{:.4}", arrival.dtdd),
                    r->format!("{:.4}", arrival.dtdz),
                    r->format!("{:.2}", arrival.spread),
                    r->format!("{:.0}", arrival.observability)
                ]);
            }
            table.printstd();
        }

        Ok(ExitCode::SUCCESS)
    }
}
