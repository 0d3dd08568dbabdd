//! Import subcommand: replace the configuration with a YAML document.

use clap::Args;
use std::path::PathBuf;

/// Arguments for the import subcommand
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// YAML document to import; missing fields take built-in defaults
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Validate and show the resulting changes without committing
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value = "cli")]
    pub actor: String,

    /// Why the import is happening (recorded in the audit log)
    #[arg(short, long)]
    pub reason: Option<String>,
}
