// av_runtime/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Onboard autonomy runtime: sensor fusion, guidance, control, and safety
/// supervision on a mock vehicle.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the mission TOML file. Defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop after this many seconds instead of running until ctrl-c.
    #[arg(long)]
    pub duration: Option<f64>,
}
