//! The configuration service.
//!
//! [`Orchestrator`] owns the current snapshot and composes the loader,
//! validator, version archive, audit log and health monitor. Every mutating
//! operation runs under one exclusive lock and publishes its result with a
//! single atomic pointer swap, so readers never block and never observe a
//! half-applied change.

use crate::audit::{AuditAction, AuditDraft, Auditor};
use crate::config::watcher::{ConfigWatcherHandle, WatchPaths, WatcherConfig, start_config_watcher};
use crate::config::{
    BotConfig, BotSection, CacheConfig, ConfigDiff, ConfigPath, FeaturesConfig, ModelConfig, PersonaConfig,
    RateLimitConfig, SafetyConfig, ServiceSettings, SnapshotLoader, TimeoutConfig, deep_merge, diff_configs,
    partial_at, validate_config, validate_into,
};
use crate::env::ProcessEnv;
use crate::error::{ConfigError, ConfigResult};
use crate::events::{Event, EventBus, ReloadSource};
use crate::guard::FlagGuard;
use crate::migrator::{Migrator, RestoredVersion, Transform, VersionRecord, content_hash};
use crate::monitor::{Monitor, ResourceProbe};
use arc_swap::ArcSwapOption;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Result of a reload.
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub version_id: String,
    pub source: ReloadSource,
    pub diff: ConfigDiff,
}

/// Result of publishing a whole new versioned snapshot.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub record: VersionRecord,
    pub previous_version: String,
    pub diff: ConfigDiff,
}

pub struct Orchestrator {
    settings: ServiceSettings,
    loader: SnapshotLoader,
    migrator: Arc<Migrator>,
    auditor: Arc<Auditor>,
    monitor: Arc<Monitor>,
    bus: Arc<EventBus>,
    current: ArcSwapOption<BotConfig>,
    /// Serializes every snapshot mutation.
    mutation: tokio::sync::Mutex<()>,
    /// Set while a reload runs; watcher events arriving meanwhile are dropped.
    reloading: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Orchestrator {
    /// Build the service and its components. Must be called within a tokio
    /// runtime. Nothing is loaded until [`Orchestrator::initialize`].
    pub fn new(
        settings: ServiceSettings,
        env: Arc<dyn ProcessEnv>,
        probe: Arc<dyn ResourceProbe>,
    ) -> ConfigResult<Arc<Self>> {
        settings
            .ensure_dirs()
            .map_err(|e| ConfigError::persistence(&settings.storage.data_dir, e))?;

        let bus = Arc::new(EventBus::new());
        let migrator = Arc::new(Migrator::open(settings.versions_dir(), settings.versions.clone())?);
        let auditor = Arc::new(Auditor::open(
            settings.audit_dir(),
            settings.audit.clone(),
            Arc::clone(&bus),
        )?);
        let monitor = Arc::new(Monitor::with_builtin_checks(
            settings.monitor.clone(),
            Arc::clone(&env),
            probe,
            Arc::clone(&bus),
        ));
        let loader = SnapshotLoader::new(settings.config_file(), env);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            settings,
            loader,
            migrator,
            auditor,
            monitor,
            bus,
            current: ArcSwapOption::empty(),
            mutation: tokio::sync::Mutex::new(()),
            reloading: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    /// Load and validate the first snapshot, then start timers and the
    /// file watcher. An invalid first snapshot is fatal. Calling it again
    /// once initialized does nothing.
    pub async fn initialize(self: &Arc<Self>) -> ConfigResult<()> {
        {
            let _lock = self.mutation.lock().await;
            if self.is_initialized() {
                debug!("Already initialized");
                return Ok(());
            }

            self.settings
                .ensure_dirs()
                .map_err(|e| ConfigError::persistence(&self.settings.storage.data_dir, e))?;
            match self.monitor.load_state(&self.settings.monitor_state_file()) {
                Ok(true) => debug!("Restored monitor state"),
                Ok(false) => {}
                Err(e) => warn!("Ignoring unreadable monitor state: {}", e),
            }

            let candidate = self.loader.load()?;
            let config = validate_into(&candidate.value)?;
            info!(
                version = %config.version_label(),
                source = ?candidate.source,
                overrides = ?candidate.overrides,
                "Loaded initial configuration"
            );
            self.current.store(Some(Arc::new(config)));
        }

        self.start_timers();
        if self.settings.watcher.enabled {
            self.start_watcher()?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.current.load().is_some()
    }

    fn current(&self) -> ConfigResult<Arc<BotConfig>> {
        self.current.load_full().ok_or(ConfigError::NotInitialized)
    }

    /// An independent copy of the current snapshot.
    pub fn get_snapshot(&self) -> ConfigResult<BotConfig> {
        self.current().map(|config| config.as_ref().clone())
    }

    pub fn bot(&self) -> ConfigResult<BotSection> {
        Ok(self.current()?.bot.clone())
    }

    pub fn model(&self) -> ConfigResult<ModelConfig> {
        Ok(self.current()?.model.clone())
    }

    pub fn rate_limits(&self) -> ConfigResult<RateLimitConfig> {
        Ok(self.current()?.rate_limits.clone())
    }

    pub fn cache(&self) -> ConfigResult<CacheConfig> {
        Ok(self.current()?.cache.clone())
    }

    pub fn features(&self) -> ConfigResult<FeaturesConfig> {
        Ok(self.current()?.features.clone())
    }

    pub fn persona(&self) -> ConfigResult<PersonaConfig> {
        Ok(self.current()?.persona.clone())
    }

    pub fn timeouts(&self) -> ConfigResult<TimeoutConfig> {
        Ok(self.current()?.timeouts.clone())
    }

    pub fn safety(&self) -> ConfigResult<SafetyConfig> {
        Ok(self.current()?.safety.clone())
    }

    /// Value at a dotted path, e.g. `rate_limits.per_user_per_minute`.
    pub fn get_value(&self, path: &str) -> ConfigResult<Value> {
        ConfigPath::parse(path)?.resolve(self.current()?.as_ref())
    }

    /// Re-read the backing store and publish any changes.
    ///
    /// On failure the current snapshot stays in place and a
    /// `config.error` event is published.
    pub async fn reload(&self, source: ReloadSource, reason: Option<&str>) -> ConfigResult<ReloadOutcome> {
        let _lock = self.mutation.lock().await;
        let _in_flight = FlagGuard::try_acquire(&self.reloading);

        let result = self.reload_locked(source, reason);
        if let Err(e) = &result {
            warn!(source = %source, "Reload rejected, keeping current configuration: {}", e);
            self.bus.publish(Event::ConfigError { message: e.to_string() });
        }
        result
    }

    fn reload_locked(&self, source: ReloadSource, reason: Option<&str>) -> ConfigResult<ReloadOutcome> {
        let current = self.current()?;
        let candidate = self.loader.load()?;
        let next = validate_into(&candidate.value)?;
        let diff = diff_configs(&current, &next);

        for change in &diff.changes {
            self.auditor.record(
                AuditDraft::new(AuditAction::Reload, source.to_string())
                    .path(change.path.clone())
                    .change(change.before.clone(), change.after.clone())
                    .reason(reason)
                    .meta("source", source.to_string()),
            );
        }

        let version_id = next.version_label().to_string();
        self.current.store(Some(Arc::new(next)));

        info!(version = %version_id, source = %source, changes = diff.len(), "Configuration reloaded");
        if !diff.is_empty() {
            self.bus.publish(Event::ConfigChanged {
                diffs: diff.changes.clone(),
            });
        }
        self.bus.publish(Event::ConfigReloaded {
            version_id: version_id.clone(),
            diff_count: diff.len(),
            source,
        });

        Ok(ReloadOutcome {
            version_id,
            source,
            diff,
        })
    }

    /// Mint a version for the current snapshot, persist and archive it.
    pub async fn save(&self, actor: &str, reason: Option<&str>) -> ConfigResult<CommitOutcome> {
        let _lock = self.mutation.lock().await;
        let current = self.current()?;
        let version_id = self.migrator.generate_version_id();
        let next = current.relabelled(&version_id, actor);
        let draft = AuditDraft::new(AuditAction::Save, actor).reason(reason);
        self.commit(&current, next, draft).await
    }

    /// Republish an archived version under a fresh id.
    pub async fn rollback_to_version(
        &self,
        version_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> ConfigResult<CommitOutcome> {
        let _lock = self.mutation.lock().await;
        let current = self.current()?;
        let RestoredVersion {
            restored_from,
            snapshot,
            ..
        } = self.migrator.rollback(version_id, actor)?;

        let draft = AuditDraft::new(AuditAction::Rollback, actor)
            .reason(reason)
            .meta("restored_from", restored_from.clone());
        let outcome = self.commit(&current, snapshot, draft).await?;

        info!(from = %outcome.previous_version, restored = %restored_from, to = %outcome.record.version_id, "Rolled back");
        self.bus.publish(Event::ConfigRolledBack {
            from: outcome.previous_version.clone(),
            to: outcome.record.version_id.clone(),
        });
        Ok(outcome)
    }

    /// Republish an archived version after running it through `transform`.
    pub async fn migrate_version(
        &self,
        from: &str,
        to: Option<&str>,
        transform: Option<Transform<'_>>,
        actor: &str,
        reason: Option<&str>,
    ) -> ConfigResult<CommitOutcome> {
        let _lock = self.mutation.lock().await;
        let current = self.current()?;
        let migrated = self.migrator.migrate(from, to, actor, transform)?;
        let draft = AuditDraft::new(AuditAction::Migrate, actor)
            .reason(reason)
            .meta("migrated_from", migrated.restored_from.clone());
        self.commit(&current, migrated.snapshot, draft).await
    }

    /// Merge a partial document into the current snapshot.
    ///
    /// The merged result is validated as a whole; on rejection nothing
    /// changes. The backing store is rewritten so a later reload keeps the
    /// edit, but no version is archived until [`Orchestrator::save`].
    pub async fn update_section(
        &self,
        partial: Value,
        actor: &str,
        reason: Option<&str>,
    ) -> ConfigResult<ConfigDiff> {
        check_partial(&partial)?;

        let _lock = self.mutation.lock().await;
        let current = self.current()?;
        let base = serde_json::to_value(current.as_ref()).map_err(|e| ConfigError::invalid("", e.to_string()))?;
        let next = validate_into(&deep_merge(base, partial))?;
        let diff = diff_configs(&current, &next);
        if diff.is_empty() {
            debug!("Update produced no changes");
            return Ok(diff);
        }
        self.loader.persist(&next)?;

        for change in &diff.changes {
            self.auditor.record(
                AuditDraft::new(AuditAction::Update, actor)
                    .path(change.path.clone())
                    .change(change.before.clone(), change.after.clone())
                    .reason(reason),
            );
        }
        self.current.store(Some(Arc::new(next)));
        info!(actor, changes = diff.len(), sections = ?diff.sections(), "Configuration updated");
        self.bus.publish(Event::ConfigChanged {
            diffs: diff.changes.clone(),
        });
        Ok(diff)
    }

    /// Set a single value by dotted path.
    pub async fn update_value(
        &self,
        path: &str,
        value: Value,
        actor: &str,
        reason: Option<&str>,
    ) -> ConfigResult<ConfigDiff> {
        let path = ConfigPath::parse(path)?;
        self.update_section(partial_at(&path, value), actor, reason).await
    }

    /// The current snapshot as YAML.
    pub fn export_config(&self, actor: &str) -> ConfigResult<String> {
        let current = self.current()?;
        let yaml = serde_yaml::to_string(current.as_ref())
            .map_err(|e| ConfigError::parse(self.loader.path(), e))?;
        self.auditor.record(
            AuditDraft::new(AuditAction::Export, actor).meta("version", current.version_label()),
        );
        Ok(yaml)
    }

    /// Replace the configuration with an imported YAML document.
    ///
    /// Missing fields take built-in defaults. Published under a fresh id.
    pub async fn import_config(&self, yaml: &str, actor: &str, reason: Option<&str>) -> ConfigResult<CommitOutcome> {
        let imported = parse_import(yaml)?;

        let _lock = self.mutation.lock().await;
        let current = self.current()?;
        let version_id = self.migrator.generate_version_id();
        let next = imported.relabelled(&version_id, actor);
        let draft = AuditDraft::new(AuditAction::Import, actor).reason(reason);
        self.commit(&current, next, draft).await
    }

    /// Changes an import would make, without committing anything.
    pub fn preview_import(&self, yaml: &str) -> ConfigResult<ConfigDiff> {
        let imported = parse_import(yaml)?;
        let current = self.current()?;
        Ok(diff_configs(&current, &imported))
    }

    /// Restore the built-in defaults under a fresh id.
    pub async fn reset_to_defaults(&self, actor: &str, reason: Option<&str>) -> ConfigResult<CommitOutcome> {
        let _lock = self.mutation.lock().await;
        let current = self.current()?;
        let version_id = self.migrator.generate_version_id();
        let next = BotConfig::default().relabelled(&version_id, actor);
        let draft = AuditDraft::new(AuditAction::Reset, actor).reason(reason);
        self.commit(&current, next, draft).await
    }

    /// Validate, archive, persist, audit and swap. Caller holds the lock.
    async fn commit(&self, current: &BotConfig, next: BotConfig, draft: AuditDraft) -> ConfigResult<CommitOutcome> {
        validate_config(&next).into_result()?;

        let record = self.migrator.archive(&next).await?;
        self.loader.persist(&next)?;

        let diff = diff_configs(current, &next);
        let before = strip_meta(current)?;
        let after = strip_meta(&next)?;
        let draft = draft
            .change(before, after)
            .meta("version", record.version_id.clone())
            .meta("previous_version", current.version_label())
            .meta("hash", record.hash.clone())
            .meta("changes", diff.len());
        self.auditor.record(draft);

        let previous_version = current.version_label().to_string();
        self.current.store(Some(Arc::new(next)));
        info!(version = %record.version_id, previous = %previous_version, changes = diff.len(), "Published configuration version");
        if !diff.is_empty() {
            self.bus.publish(Event::ConfigChanged {
                diffs: diff.changes.clone(),
            });
        }

        Ok(CommitOutcome {
            record,
            previous_version,
            diff,
        })
    }

    /// Leaf diffs between two archived versions.
    pub fn diff_versions(&self, from: &str, to: &str) -> ConfigResult<ConfigDiff> {
        let a = self.migrator.load_verified(from)?;
        let b = self.migrator.load_verified(to)?;
        Ok(diff_configs(&a.snapshot, &b.snapshot))
    }

    pub fn history(&self) -> ConfigResult<Vec<VersionRecord>> {
        self.migrator.history()
    }

    /// Content hash of the current snapshot.
    pub fn current_hash(&self) -> ConfigResult<String> {
        content_hash(self.current()?.as_ref())
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn auditor(&self) -> &Arc<Auditor> {
        &self.auditor
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn migrator(&self) -> &Arc<Migrator> {
        &self.migrator
    }

    /// Run checks against the current snapshot and evaluate alerts.
    pub async fn check_health(&self) -> ConfigResult<crate::monitor::AggregateHealth> {
        let config = self.current()?;
        let health = self.monitor.run_checks(&config);
        self.monitor.evaluate_alerts(&health).await;
        Ok(health)
    }

    fn spawn(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(task);
    }

    fn start_timers(self: &Arc<Self>) {
        let significant = self.auditor.significant_notify();
        let poll = self.settings.monitor.poll_interval();
        self.spawn(tokio::spawn(run_timer(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            poll,
            Some(significant),
            |this| async move {
                let Ok(config) = this.current() else { return };
                if let Some(health) = this.monitor.poll_once(&config).await {
                    debug!(status = %health.status, "Health poll");
                }
            },
        )));

        let sweep = self.settings.audit.sweep_interval();
        self.spawn(tokio::spawn(run_timer(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            sweep,
            None,
            |this| async move {
                this.auditor.sweep();
            },
        )));

        let cleanup = self.settings.versions.cleanup_interval();
        self.spawn(tokio::spawn(run_timer(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            cleanup,
            None,
            |this| async move {
                if let Err(e) = this.migrator.cleanup().await {
                    warn!("Version cleanup failed: {}", e);
                }
            },
        )));
    }

    fn start_watcher(self: &Arc<Self>) -> ConfigResult<()> {
        let paths = WatchPaths {
            data_dir: self.settings.storage.data_dir.clone(),
            config_file: self.settings.storage.config_file.clone(),
        };
        let config = WatcherConfig {
            debounce_duration: self.settings.watcher.debounce(),
        };
        let handle = start_config_watcher(paths, config).map_err(|e| ConfigError::Watcher(e.to_string()))?;
        self.spawn(tokio::spawn(run_watcher(
            Arc::downgrade(self),
            handle,
            self.shutdown_tx.subscribe(),
        )));
        Ok(())
    }

    /// Stop timers and the watcher, flush the audit log and persist monitor
    /// state. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down configuration service");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }

        // Wait for any in-flight mutation to finish before flushing.
        let _lock = self.mutation.lock().await;
        self.auditor.shutdown().await;
        if let Err(e) = self.monitor.save_state(&self.settings.monitor_state_file()) {
            warn!("Failed to persist monitor state: {}", e);
        }
    }
}

/// Parse an imported YAML document over the built-in defaults and validate it.
fn parse_import(yaml: &str) -> ConfigResult<BotConfig> {
    let imported: Value = serde_yaml::from_str(yaml).map_err(|e| ConfigError::parse("<import>", e))?;
    if !imported.is_object() {
        return Err(ConfigError::parse("<import>", "top level must be a mapping of sections"));
    }
    let defaults = serde_json::to_value(BotConfig::default()).map_err(|e| ConfigError::invalid("", e.to_string()))?;
    validate_into(&deep_merge(defaults, imported))
}

/// Every leaf in a partial update must be a known path.
fn check_partial(partial: &Value) -> ConfigResult<()> {
    let Value::Object(sections) = partial else {
        return Err(ConfigError::invalid("", "update must be a mapping of sections"));
    };
    for (section, value) in sections {
        if crate::config::BOOKKEEPING_KEYS.contains(&section.as_str()) {
            return Err(ConfigError::invalid(section.as_str(), "version metadata cannot be updated"));
        }
        check_known(&ConfigPath::new(vec![section.clone()]), value)?;
    }
    Ok(())
}

fn check_known(path: &ConfigPath, value: &Value) -> ConfigResult<()> {
    if !path.is_known() {
        return Err(ConfigError::UnknownPath { path: path.to_string() });
    }
    if let Value::Object(fields) = value {
        for (key, child) in fields {
            check_known(&path.child(key.clone()), child)?;
        }
    }
    Ok(())
}

fn strip_meta(config: &BotConfig) -> ConfigResult<Value> {
    let mut value = serde_json::to_value(config).map_err(|e| ConfigError::invalid("", e.to_string()))?;
    if let Value::Object(map) = &mut value {
        for key in crate::config::BOOKKEEPING_KEYS {
            map.remove(*key);
        }
    }
    Ok(value)
}

/// Run `job` every `period`, and whenever `wake` fires, until shutdown.
async fn run_timer<F, Fut>(
    this: Weak<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    wake: Option<Arc<tokio::sync::Notify>>,
    job: F,
) where
    F: Fn(Arc<Orchestrator>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = async {
                match &wake {
                    Some(notify) => notify.notified().await,
                    None => std::future::pending().await,
                }
            } => {}
        }
        if *shutdown.borrow() {
            break;
        }
        let Some(this) = this.upgrade() else { break };
        job(this).await;
    }
}

async fn run_watcher(
    this: Weak<Orchestrator>,
    mut handle: ConfigWatcherHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = handle.wait_for_change() => event,
        };
        let Some(event) = event else { break };
        if !event.requires_reload() {
            warn!("Config watcher reported: {:?}", event);
            continue;
        }
        let Some(this) = this.upgrade() else { break };
        if this.reloading.load(Ordering::SeqCst) {
            debug!("Reload already in flight, ignoring watcher event");
            continue;
        }
        // Errors are published as config.error by reload itself.
        let _ = this.reload(ReloadSource::Watcher, Some("backing store changed")).await;
        // Drop whatever arrived while that reload ran.
        let _ = handle.events.borrow_and_update();
    }
    handle.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use crate::monitor::FixedProbe;
    use serde_json::json;
    use tempfile::TempDir;

    async fn service(temp: &TempDir) -> Arc<Orchestrator> {
        let mut settings = ServiceSettings::with_data_dir(temp.path());
        settings.watcher.enabled = false;
        let orchestrator =
            Orchestrator::new(settings, Arc::new(MapEnv::new()), Arc::new(FixedProbe(None))).unwrap();
        orchestrator.initialize().await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_accessors_before_initialize() {
        let temp = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            ServiceSettings::with_data_dir(temp.path()),
            Arc::new(MapEnv::new()),
            Arc::new(FixedProbe(None)),
        )
        .unwrap();
        assert!(matches!(orchestrator.get_snapshot(), Err(ConfigError::NotInitialized)));
        assert!(matches!(orchestrator.model(), Err(ConfigError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let mut copy = orchestrator.get_snapshot().unwrap();
        copy.model.name = "tampered".to_string();
        assert_eq!(orchestrator.model().unwrap().name, "claude-sonnet");
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_merge() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let before = orchestrator.get_snapshot().unwrap();

        // Valid on its own, invalid against the daily limit once merged.
        let result = orchestrator
            .update_section(json!({"rate_limits": {"per_user_per_minute": 100}}), "alice", None)
            .await;
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
        assert_eq!(orchestrator.get_snapshot().unwrap(), before);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_unknown_path() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let result = orchestrator
            .update_section(json!({"model": {"colour": "blue"}}), "alice", None)
            .await;
        assert!(matches!(result, Err(ConfigError::UnknownPath { .. })));
        let meta = orchestrator
            .update_section(json!({"meta": {"version": "v1"}}), "alice", None)
            .await;
        assert!(matches!(meta, Err(ConfigError::Validation { .. })));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_value_records_audit() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let diff = orchestrator
            .update_value("cache.ttl_seconds", json!(600), "alice", Some("fresher answers"))
            .await
            .unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(orchestrator.get_value("cache.ttl_seconds").unwrap(), json!(600));
        assert_eq!(orchestrator.auditor().len(), 1);
        assert!(matches!(
            orchestrator.get_value("cache.colour"),
            Err(ConfigError::UnknownPath { .. })
        ));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_survives_reload() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        orchestrator
            .update_value("cache.ttl_seconds", json!(600), "alice", None)
            .await
            .unwrap();

        let outcome = orchestrator.reload(ReloadSource::Manual, None).await.unwrap();
        assert!(outcome.diff.is_empty());
        assert_eq!(orchestrator.cache().unwrap().ttl_seconds, 600);
        // Persisted, not versioned.
        assert!(orchestrator.history().unwrap().is_empty());
        assert_eq!(orchestrator.auditor().len(), 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_initialize_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let tasks = orchestrator.tasks.lock().unwrap().len();

        let mut edited = BotConfig::default();
        edited.persona.style = "terse".to_string();
        orchestrator.loader.persist(&edited).unwrap();

        orchestrator.initialize().await.unwrap();
        assert_eq!(orchestrator.tasks.lock().unwrap().len(), tasks);
        assert_eq!(orchestrator.persona().unwrap().style, "friendly");
        assert!(orchestrator.auditor().is_empty());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_persists_and_archives() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let outcome = orchestrator.save("ops", Some("baseline")).await.unwrap();

        let snapshot = orchestrator.get_snapshot().unwrap();
        assert_eq!(snapshot.meta.version.as_deref(), Some(outcome.record.version_id.as_str()));
        assert_eq!(outcome.previous_version, "unversioned");
        assert_eq!(orchestrator.current_hash().unwrap(), outcome.record.hash);
        assert!(orchestrator.settings().config_file().exists());
        assert_eq!(orchestrator.history().unwrap().len(), 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_export_import_reset() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;

        let yaml = orchestrator.export_config("ops").unwrap();
        assert!(yaml.contains("claude-sonnet"));

        let outcome = orchestrator
            .import_config("persona:\n  style: terse\n", "ops", Some("new voice"))
            .await
            .unwrap();
        assert_eq!(outcome.diff.len(), 1);
        assert_eq!(orchestrator.persona().unwrap().style, "terse");

        let reset = orchestrator.reset_to_defaults("ops", None).await.unwrap();
        assert_eq!(reset.diff.len(), 1);
        assert_eq!(orchestrator.persona().unwrap().style, "friendly");

        let bad = orchestrator.import_config("- not\n- a map\n", "ops", None).await;
        assert!(matches!(bad, Err(ConfigError::Parse { .. })));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_diff_versions() {
        let temp = TempDir::new().unwrap();
        let orchestrator = service(&temp).await;
        let first = orchestrator.save("ops", None).await.unwrap();
        orchestrator
            .update_value("model.temperature", json!(0.2), "ops", None)
            .await
            .unwrap();
        let second = orchestrator.save("ops", None).await.unwrap();

        let diff = orchestrator
            .diff_versions(&first.record.version_id, &second.record.version_id)
            .unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.changes[0].path.to_string(), "model.temperature");
        orchestrator.shutdown().await;
    }

    #[test]
    fn test_check_partial() {
        assert!(check_partial(&json!({"timeouts": {"request_ms": 1}})).is_ok());
        assert!(check_partial(&json!({"features": {"enabled": ["chat"]}})).is_ok());
        assert!(check_partial(&json!([1, 2])).is_err());
        assert!(matches!(
            check_partial(&json!({"nonsense": 1})),
            Err(ConfigError::UnknownPath { .. })
        ));
    }
}
