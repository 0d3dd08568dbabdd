//! Tracing setup for the binary.
//!
//! The `--log` target selects where output goes: `0`/`off` disables logging,
//! `1`/`stdout` and `2`/`stderr` write to the console, and anything else is
//! treated as a file name opened in append mode without ANSI colours.
//! `RUST_LOG` overrides the default level when set.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stdout,
    Stderr,
    File(String),
}

impl LogTarget {
    pub fn parse(target: &str) -> Self {
        match target {
            "0" | "off" => LogTarget::Off,
            "1" | "stdout" => LogTarget::Stdout,
            "2" | "stderr" => LogTarget::Stderr,
            filename => LogTarget::File(filename.to_string()),
        }
    }
}

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
pub fn init_tracing(target: &str, verbose: bool) -> Result<()> {
    match LogTarget::parse(target) {
        LogTarget::Off => {}
        LogTarget::Stdout => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::Stderr => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::File(filename) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filename)
                .with_context(|| format!("failed to open log file {}", filename))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
