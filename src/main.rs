//! Config Sentinel binary.

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::Parser;
use config_sentinel::cli::audit::{OutputFormat, render_entry};
use config_sentinel::cli::diff::render_diff;
use config_sentinel::cli::{Cli, Command};
use config_sentinel::config::{ServiceSettings, SettingsLoader, SnapshotLoader, validate};
use config_sentinel::env::{MapEnv, ProcessEnv, SystemEnv};
use config_sentinel::events::EventKind;
use config_sentinel::gate::HealthGate;
use config_sentinel::logging::init_tracing;
use config_sentinel::monitor::ProcProbe;
use config_sentinel::orchestrator::Orchestrator;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log, cli.verbose)?;

    let settings = load_settings(&cli)?;
    info!(
        data_dir = %settings.storage.data_dir.display(),
        deployment = ?settings.deployment,
        "Settings loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Validate => validate_persisted(&settings),
        command => run_once(settings, command).await,
    }
}

/// Settings from the tiers, then CLI overrides.
fn load_settings(cli: &Cli) -> Result<ServiceSettings> {
    let loader = match &cli.settings {
        Some(path) => {
            // Explicit file replaces tier discovery; pass it through the
            // environment view rather than mutating the process environment.
            let env: MapEnv = std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect();
            let env = env.with("SENTINEL_SETTINGS_PATH", path.to_string_lossy());
            SettingsLoader::load(&env)?
        }
        None => SettingsLoader::load(&SystemEnv)?,
    };
    for (tier, path) in loader.sources() {
        debug!(tier = ?tier, path = %path.display(), "Settings tier applied");
    }

    let mut settings = loader.into_settings();
    if let Some(data_dir) = &cli.data_dir {
        settings.storage.data_dir = data_dir.clone();
    }
    if let Some(deployment) = &cli.deployment {
        settings.deployment = deployment.parse().map_err(|e: String| anyhow!(e))?;
    }
    Ok(settings)
}

fn env() -> Arc<dyn ProcessEnv> {
    Arc::new(SystemEnv)
}

async fn serve(settings: ServiceSettings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings, env(), Arc::new(ProcProbe))?;
    orchestrator.initialize().await?;

    let gate = HealthGate::new(Arc::clone(&orchestrator));
    if let Err(e) = gate.startup_validation() {
        orchestrator.shutdown().await;
        return Err(e.into());
    }

    // Surface every event in the log.
    if let Some(mut events) = orchestrator.events().subscribe("log", EventKind::ALL) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(payload) => info!(kind = event.kind().name(), "{}", payload),
                    Err(e) => warn!("Unserializable event: {}", e),
                }
            }
        });
    }

    info!(
        version = %orchestrator.get_snapshot()?.version_label(),
        "Configuration service running; press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    orchestrator.shutdown().await;
    info!("Configuration service stopped");
    Ok(())
}

/// Check the persisted document plus environment overrides without starting anything.
fn validate_persisted(settings: &ServiceSettings) -> Result<()> {
    let loader = SnapshotLoader::new(settings.config_file(), env());
    let candidate = loader.load()?;
    let report = validate(&candidate.value);
    if report.valid {
        println!("{}: valid", loader.path().display());
        if !candidate.overrides.is_empty() {
            println!("Environment overrides: {}", candidate.overrides.join(", "));
        }
        return Ok(());
    }
    println!("{}: invalid", loader.path().display());
    for issue in &report.errors {
        println!("  {}", issue);
    }
    bail!("{} validation error(s)", report.errors.len())
}

/// One-shot commands: bring the service up without the watcher, run the
/// command, and shut down cleanly so audit entries are flushed.
async fn run_once(mut settings: ServiceSettings, command: Command) -> Result<()> {
    settings.watcher.enabled = false;
    let orchestrator = Orchestrator::new(settings, env(), Arc::new(ProcProbe))?;
    orchestrator.initialize().await?;
    let result = execute(&orchestrator, command).await;
    orchestrator.shutdown().await;
    result
}

async fn execute(orchestrator: &Arc<Orchestrator>, command: Command) -> Result<()> {
    match command {
        Command::History(args) => {
            let mut records = orchestrator.history()?;
            if let Some(limit) = args.limit {
                records.truncate(limit);
            }
            match args.format {
                OutputFormat::Json => {
                    let listing: Vec<_> = records
                        .iter()
                        .map(|r| {
                            json!({
                                "version_id": r.version_id,
                                "created_at": r.created_at,
                                "hash": r.hash,
                                "updated_by": r.snapshot.meta.updated_by,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                }
                OutputFormat::Text => {
                    if records.is_empty() {
                        println!("No archived versions.");
                    }
                    for record in &records {
                        println!(
                            "{}  {}  {}  {}",
                            record.version_id,
                            record.created_at.format("%Y-%m-%d %H:%M:%S"),
                            &record.hash[..12.min(record.hash.len())],
                            record.snapshot.meta.updated_by.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
        }
        Command::Rollback(args) => {
            let outcome = orchestrator
                .rollback_to_version(&args.version, &args.change.actor, args.change.reason.as_deref())
                .await?;
            println!(
                "Restored {} as {} ({} change(s))",
                args.version,
                outcome.record.version_id,
                outcome.diff.len()
            );
        }
        Command::Save(args) => {
            let outcome = orchestrator.save(&args.actor, args.reason.as_deref()).await?;
            println!("Saved {} ({})", outcome.record.version_id, outcome.record.hash);
        }
        Command::Reset(args) => {
            let outcome = orchestrator
                .reset_to_defaults(&args.actor, args.reason.as_deref())
                .await?;
            println!(
                "Reset to defaults as {} ({} change(s))",
                outcome.record.version_id,
                outcome.diff.len()
            );
        }
        Command::Audit(args) => {
            let filter = args.to_filter(Utc::now()).map_err(|e| anyhow!(e))?;
            let entries = orchestrator.auditor().query(&filter);
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Text => {
                    if entries.is_empty() {
                        println!("No matching audit entries.");
                    }
                    for entry in &entries {
                        println!("{}", render_entry(entry));
                    }
                }
            }
        }
        Command::Report => {
            let gate = HealthGate::new(Arc::clone(orchestrator));
            print!("{}", gate.report_generation()?);
        }
        Command::Export(args) => {
            let yaml = orchestrator.export_config(&args.actor)?;
            match &args.output {
                Some(path) => {
                    std::fs::write(path, yaml).with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => print!("{}", yaml),
            }
        }
        Command::Import(args) => {
            let yaml = std::fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            if args.dry_run {
                let diff = orchestrator.preview_import(&yaml)?;
                print!("{}", render_diff(&diff));
                println!("Dry run: no changes made.");
            } else {
                let outcome = orchestrator
                    .import_config(&yaml, &args.actor, args.reason.as_deref())
                    .await?;
                println!(
                    "Imported as {} ({} change(s))",
                    outcome.record.version_id,
                    outcome.diff.len()
                );
            }
        }
        Command::Diff(args) => {
            let diff = orchestrator.diff_versions(&args.from, &args.to)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&diff)?);
            } else {
                print!("{}", render_diff(&diff));
            }
        }
        Command::Serve | Command::Validate => bail!("command does not run against a live service"),
    }
    Ok(())
}
