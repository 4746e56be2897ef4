use super::helpers::{self, GlobalConfiguration, Subcommand};
use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use prettytable::row;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use tauloc::event::Event;
use tauloc::phase_id::PhaseIdentifier;
use tauloc::request::{LocationRequest, LocationResult};
use tauloc::volume::SessionOptions;

/// Identify the phases of an event's picks and report residuals.
#[derive(Parser)]
pub struct Opts {
    /// Path to the event input, text or JSON.
    #[arg(value_hint = ValueHint::FilePath)]
    event: PathBuf,
    /// Parse the event as a JSON location request.
    #[arg(long)]
    json: bool,
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let volume = helpers::load_volume(cfg)?;
        let aux = helpers::load_aux(cfg)?;

        let reader = BufReader::new(
            File::open(&self.event)
                .with_context(|| format!("unable to open '{}'", self.event.display()))?,
        );
        let mut event = if self.json {
            let request: LocationRequest =
                serde_json::from_reader(reader).context("malformed location request")?;
            request.to_event()?
        } else {
            Event::from_reader(reader)?
        };

        let session = volume.new_session(
            Some(&aux),
            event.hypo.depth,
            SessionOptions {
                epicenter: Some(event.hypo.epicenter()),
                ..SessionOptions::default()
            },
        )?;

        let identifier = PhaseIdentifier::new(&aux.groups);
        let identified = identifier.identify_event(&mut event, &session);

        let mut table = helpers::create_table();
        table.set_titles(row![
            "station",
            "observed",
            "identified",
            r->"delta (deg)",
            r->"azim (deg)",
            r->"residual (s)"
        ]);
        for pick in event.picks.iter().filter(|p| p.use_flag) {
            table.add_row(row![
                format!("{}.{}", pick.station.network, pick.station.code),
                pick.observed_phase,
                pick.current_phase,
                r->format!("{:.2}", pick.delta),
                r->format!("{:.1}", pick.azimuth),
                r->pick
                    .residual
                    .map_or_else(|| "-".to_owned(), |r| format!("{r:.2}"))
            ]);
        }
        table.printstd();

        let summary = LocationResult::summarize(&event);
        println!(
            "identified {identified} of {} used picks, rms = {:.2} s, gap = {:.0} deg, quality {}",
            event.used_count(),
            summary.rms,
            summary.gap,
            summary.quality
        );

        Ok(ExitCode::SUCCESS)
    }
}
