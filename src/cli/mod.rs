//! CLI command definitions for config-sentinel
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod audit;
pub mod diff;
pub mod export;
pub mod import;

use audit::{AuditArgs, OutputFormat};
use clap::{Args, Parser, Subcommand};
use diff::DiffArgs;
use export::ExportArgs;
use import::ImportArgs;
use std::path::PathBuf;

/// Versioned, audited configuration service for chat bot deployments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Explicit settings file (replaces tier discovery)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Data directory holding the snapshot, versions and audit log (overrides settings)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Deployment context: production, staging or development (overrides settings)
    #[arg(long, global = true)]
    pub deployment: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the service until interrupted (default if no subcommand given)
    Serve,

    /// Validate the persisted configuration without starting the service
    Validate,

    /// List archived versions, newest first
    History(HistoryArgs),

    /// Republish an archived version under a fresh id
    Rollback(RollbackArgs),

    /// Archive the current configuration as a new version
    Save(ChangeArgs),

    /// Restore built-in defaults as a new version
    Reset(ChangeArgs),

    /// Query the audit log
    Audit(AuditArgs),

    /// Print health, readiness, audit and compliance summary
    Report,

    /// Export the current configuration as YAML
    Export(ExportArgs),

    /// Import a YAML configuration as a new version
    Import(ImportArgs),

    /// Compare two archived versions
    Diff(DiffArgs),
}

/// Who is making a change and why.
#[derive(Args, Debug)]
pub struct ChangeArgs {
    #[arg(long, default_value = "cli")]
    pub actor: String,

    /// Recorded in the audit log
    #[arg(short, long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of versions to list
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Version id to restore
    #[arg(value_name = "VERSION")]
    pub version: String,

    #[command(flatten)]
    pub change: ChangeArgs,
}
