//! Diff subcommand: compare two archived versions.

use crate::config::{ChangeKind, ConfigDiff};
use clap::Args;

/// Arguments for the diff subcommand
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Older version id
    #[arg(value_name = "VERSION")]
    pub from: String,

    /// Newer version id
    #[arg(value_name = "VERSION")]
    pub to: String,

    /// Print the diff as JSON
    #[arg(long)]
    pub json: bool,
}

/// Text rendering, one changed leaf per line.
pub fn render_diff(diff: &ConfigDiff) -> String {
    if diff.is_empty() {
        return "No changes.\n".to_string();
    }
    let mut out = String::new();
    for change in &diff.changes {
        let line = match change.kind() {
            ChangeKind::Added => format!("+ {} = {}\n", change.path, change.after),
            ChangeKind::Removed => format!("- {} (was {})\n", change.path, change.before),
            ChangeKind::Modified => format!("~ {}: {} -> {}\n", change.path, change.before, change.after),
        };
        out.push_str(&line);
    }
    out.push_str(&format!("{} change(s)\n", diff.len()));
    out
}
