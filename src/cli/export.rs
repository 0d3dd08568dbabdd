//! Export subcommand: write the current snapshot as YAML.

use clap::Args;
use std::path::PathBuf;

/// Arguments for the export subcommand
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file path (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Recorded as the actor of the export audit entry
    #[arg(long, default_value = "cli")]
    pub actor: String,
}
