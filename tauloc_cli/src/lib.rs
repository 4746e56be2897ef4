#![allow(clippy::missing_errors_doc)]
#![allow(missing_docs)]

mod arrivals;
mod helpers;
mod identify;
mod read;

use anyhow::Result;
use clap::Parser;
use enum_dispatch::enum_dispatch;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
pub struct GlobalConfiguration {
    /// Directory holding the model and auxiliary table files.
    #[arg(default_value = ".", long, value_name = "DIR")]
    pub table_dir: PathBuf,
    /// Earth model name, selecting `<model>.hed` and `<model>.tbl`.
    #[arg(default_value = "ak135", long, value_name = "MODEL")]
    pub model: String,
    /// Sources above this depth rebuild the up-going grid, in km.
    #[arg(default_value_t = 35.0, long, value_name = "KM")]
    pub shallow_limit: f64,
}

#[enum_dispatch]
pub trait Subcommand {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode>;
}

#[enum_dispatch(Subcommand)]
#[derive(Parser)]
pub enum SubcommandEnum {
    Arrivals(arrivals::Opts),
    Identify(identify::Opts),
    Read(read::Opts),
}

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about = "Seismic travel times and phase identification",
    disable_help_subcommand = true,
    name = "tauloc",
    version
)]
pub struct Opts {
    #[command(flatten)]
    pub configuration: GlobalConfiguration,
    #[command(subcommand)]
    pub subcommand: SubcommandEnum,
}
