use super::helpers::{self, GlobalConfiguration, Subcommand};
use anyhow::Result;
use clap::Parser;
use prettytable::row;
use std::process::ExitCode;

/// Print summary information of a model header.
#[derive(Parser)]
pub struct Opts {
    /// Show the branch table.
    #[arg(long, short)]
    branches: bool,
}

impl Subcommand for Opts {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode> {
        let volume = helpers::load_volume(cfg)?;
        let cvt = volume.conversions();

        println!("model {}", cfg.model);
        println!(
            "  normalization: xNorm = {:.6e} 1/km, pNorm = {:.6} s/km, tNorm = {:.6} s",
            cvt.x_norm, cvt.p_norm, cvt.t_norm
        );
        println!(
            "  surface radius {:.1} km, moho {:.1} km, upper mantle {:.1} km, inner core {:.1} km",
            cvt.surface_radius, cvt.moho_depth, cvt.upper_mantle_depth, cvt.inner_core_depth
        );
        println!("  {} branches", volume.branches().len());

        if self.branches {
            let mut table = helpers::create_table();
            table.set_titles(row![
                "phase",
                "segment",
                r->"p0",
                r->"p1",
                r->"x0 (deg)",
                r->"x1 (deg)",
                "up",
                "diff",
                "add-on"
            ]);
            for branch in volume.branches() {
                table.add_row(row![
                    branch.phase,
                    branch.segment,
                    r->format!("{:.4}", branch.p_range[0]),
                    r->format!("{:.4}", branch.p_range[1]),
                    r->format!("{:.2}", branch.x_range[0].to_degrees()),
                    r->format!("{:.2}", branch.x_range[1].to_degrees()),
                    if branch.is_up_going { "y" } else { "" },
                    branch
                        .diffracted
                        .as_ref()
                        .map_or("", |d| d.phase.as_str()),
                    branch
                        .add_on
                        .map_or_else(String::new, |a| format!("{a:?}"))
                ]);
            }
            table.printstd();
        }

        Ok(ExitCode::SUCCESS)
    }
}
