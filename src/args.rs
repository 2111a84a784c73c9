//! Command-line interface for the daemon.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lumend", version, about = "Ambient display-control daemon")]
pub struct Args {
    /// Path to the configuration file (defaults to the XDG location).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log operational detail.
    #[arg(long)]
    pub debug: bool,
}
