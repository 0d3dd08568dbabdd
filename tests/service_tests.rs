//! End-to-end tests for the configuration service lifecycle.

use config_sentinel::audit::{AuditAction, AuditFilter};
use config_sentinel::config::{BotConfig, ServiceSettings, deep_merge, validate_config};
use config_sentinel::env::MapEnv;
use config_sentinel::events::{Event, EventKind, ReloadSource};
use config_sentinel::migrator::content_hash;
use config_sentinel::monitor::FixedProbe;
use config_sentinel::{ConfigError, Orchestrator};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings(temp: &TempDir) -> ServiceSettings {
    let mut settings = ServiceSettings::with_data_dir(temp.path());
    settings.watcher.enabled = false;
    settings
}

async fn start(settings: ServiceSettings, env: MapEnv) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(settings, Arc::new(env), Arc::new(FixedProbe::percent(10))).unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator
}

/// A complete store document: the defaults with `yaml` merged over them.
fn store_document(yaml: &str) -> String {
    let defaults = serde_json::to_value(BotConfig::default()).unwrap();
    let edits: Value = serde_yaml::from_str(yaml).unwrap();
    serde_yaml::to_string(&deep_merge(defaults, edits)).unwrap()
}

fn write_config(settings: &ServiceSettings, yaml: &str) {
    std::fs::write(settings.config_file(), store_document(yaml)).unwrap();
}

#[tokio::test]
async fn test_initialize_without_store_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;

    let snapshot = orchestrator.get_snapshot().unwrap();
    assert_eq!(snapshot, BotConfig::default());
    assert!(validate_config(&snapshot).valid);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_environment_overrides_apply_on_initialize() {
    let temp = TempDir::new().unwrap();
    let env = MapEnv::new()
        .with("BOT_MODEL", "claude-haiku")
        .with("BOT_TEMPERATURE", "0.1");
    let orchestrator = start(settings(&temp), env).await;

    let model = orchestrator.model().unwrap();
    assert_eq!(model.name, "claude-haiku");
    assert_eq!(model.temperature, 0.1);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_initial_store_is_fatal() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    write_config(&settings, "model:\n  temperature: 5.0\n");

    let orchestrator = Orchestrator::new(settings, Arc::new(MapEnv::new()), Arc::new(FixedProbe(None))).unwrap();
    let result = orchestrator.initialize().await;
    assert!(matches!(result, Err(ConfigError::Validation { .. })));
    assert!(!orchestrator.is_initialized());
}

#[tokio::test]
async fn test_malformed_store_is_parse_error() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    std::fs::write(settings.config_file(), "model: [unterminated\n").unwrap();

    let orchestrator = Orchestrator::new(settings, Arc::new(MapEnv::new()), Arc::new(FixedProbe(None))).unwrap();
    assert!(matches!(
        orchestrator.initialize().await,
        Err(ConfigError::Parse { .. })
    ));
}

#[tokio::test]
async fn test_store_missing_sections_is_rejected() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    std::fs::write(settings.config_file(), "bot:\n  name: truncated\n").unwrap();

    let orchestrator = Orchestrator::new(settings, Arc::new(MapEnv::new()), Arc::new(FixedProbe(None))).unwrap();
    match orchestrator.initialize().await {
        Err(ConfigError::Validation { errors }) => {
            assert!(errors.iter().any(|issue| issue.path == "model"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!orchestrator.is_initialized());
}

#[tokio::test]
async fn test_reload_of_truncated_store_keeps_snapshot() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;
    let before = orchestrator.get_snapshot().unwrap();

    std::fs::write(settings.config_file(), "bot:\n  name: truncated\n").unwrap();
    let result = orchestrator.reload(ReloadSource::Manual, None).await;
    assert!(matches!(result, Err(ConfigError::Validation { .. })));
    assert_eq!(orchestrator.get_snapshot().unwrap(), before);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_reload_rate_limit_change_is_audited() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;
    let mut events = orchestrator
        .events()
        .subscribe("test", &[EventKind::ConfigChanged, EventKind::ConfigReloaded])
        .unwrap();

    write_config(&settings, "rate_limits:\n  per_user_per_minute: 5\n");
    let outcome = orchestrator.reload(ReloadSource::Manual, Some("tighten")).await.unwrap();
    assert_eq!(outcome.diff.len(), 1);

    let entries = orchestrator.auditor().query(&AuditFilter::default());
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.action, AuditAction::Reload);
    assert_eq!(entry.path.as_ref().unwrap().to_string(), "rate_limits.per_user_per_minute");
    assert_eq!(entry.before, Some(json!(10)));
    assert_eq!(entry.after, Some(json!(5)));
    assert!(!entry.significant);
    assert_eq!(entry.reason.as_deref(), Some("tighten"));

    match events.recv().await.unwrap() {
        Event::ConfigChanged { diffs } => assert_eq!(diffs.len(), 1),
        other => panic!("unexpected event: {:?}", other),
    }
    match events.recv().await.unwrap() {
        Event::ConfigReloaded { diff_count, source, .. } => {
            assert_eq!(diff_count, 1);
            assert_eq!(source, ReloadSource::Manual);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_failed_reload_keeps_snapshot_and_emits_error() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;
    let mut errors = orchestrator
        .events()
        .subscribe("errors", &[EventKind::ConfigError])
        .unwrap();
    let before = orchestrator.get_snapshot().unwrap();

    write_config(&settings, "timeouts:\n  connect_ms: 90000\n  request_ms: 2000\n");
    let result = orchestrator.reload(ReloadSource::Manual, None).await;
    assert!(matches!(result, Err(ConfigError::Validation { .. })));
    assert_eq!(orchestrator.get_snapshot().unwrap(), before);
    assert!(matches!(errors.recv().await, Some(Event::ConfigError { .. })));
    assert!(orchestrator.auditor().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_back_to_back_reloads_are_serial() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;

    write_config(&settings, "cache:\n  ttl_seconds: 60\n");
    let (a, b) = tokio::join!(
        orchestrator.reload(ReloadSource::Manual, None),
        orchestrator.reload(ReloadSource::Manual, None)
    );
    let mut counts = vec![a.unwrap().diff.len(), b.unwrap().diff.len()];
    counts.sort();
    // Whichever ran second saw the first's effects and found nothing new.
    assert_eq!(counts, vec![0, 1]);
    assert_eq!(orchestrator.auditor().len(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_never_see_mixed_snapshots() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;

    let reader = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            for _ in 0..2000 {
                let snapshot = orchestrator.get_snapshot().unwrap();
                let pair = (snapshot.model.temperature, snapshot.cache.ttl_seconds);
                assert!(
                    pair == (0.7, 3600) || pair == (0.3, 100) || pair == (0.9, 900),
                    "mixed snapshot observed: {:?}",
                    pair
                );
                tokio::task::yield_now().await;
            }
        })
    };

    for i in 0..20 {
        let yaml = if i % 2 == 0 {
            "model:\n  temperature: 0.3\ncache:\n  ttl_seconds: 100\n"
        } else {
            "model:\n  temperature: 0.9\ncache:\n  ttl_seconds: 900\n"
        };
        write_config(&settings, yaml);
        orchestrator.reload(ReloadSource::Manual, None).await.unwrap();
    }
    reader.await.unwrap();
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_save_then_rollback_reproduces_content() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;

    let saved = orchestrator.save("ops", Some("baseline")).await.unwrap();
    orchestrator
        .update_section(json!({"persona": {"style": "formal"}}), "ops", None)
        .await
        .unwrap();
    orchestrator.save("ops", None).await.unwrap();

    let restored = orchestrator
        .rollback_to_version(&saved.record.version_id, "ops", Some("revert persona"))
        .await
        .unwrap();
    assert_ne!(restored.record.version_id, saved.record.version_id);
    assert!(restored.record.version_id > saved.record.version_id);
    assert_eq!(restored.record.hash, saved.record.hash);

    let snapshot = orchestrator.get_snapshot().unwrap();
    assert_eq!(snapshot.persona.style, "friendly");
    assert_eq!(content_hash(&snapshot).unwrap(), saved.record.hash);
    assert_eq!(snapshot.meta.version.as_deref(), Some(restored.record.version_id.as_str()));

    let rollbacks = orchestrator.auditor().query(&AuditFilter {
        actions: vec![AuditAction::Rollback],
        ..Default::default()
    });
    assert_eq!(rollbacks.len(), 1);
    assert!(rollbacks[0].significant);
    assert_eq!(orchestrator.history().unwrap().len(), 3);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_rollback_publishes_from_and_to() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;
    let first = orchestrator.save("ops", None).await.unwrap();
    let second = orchestrator.save("ops", None).await.unwrap();
    let mut events = orchestrator
        .events()
        .subscribe("rollbacks", &[EventKind::ConfigRolledBack])
        .unwrap();

    let restored = orchestrator
        .rollback_to_version(&first.record.version_id, "ops", None)
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        Event::ConfigRolledBack { from, to } => {
            assert_eq!(from, second.record.version_id);
            assert_eq!(to, restored.record.version_id);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_tampered_version_fails_integrity() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;
    let saved = orchestrator.save("ops", None).await.unwrap();

    let record_path = settings
        .versions_dir()
        .join(format!("{}.json", saved.record.version_id));
    let mut record: Value = serde_json::from_str(&std::fs::read_to_string(&record_path).unwrap()).unwrap();
    record["snapshot"]["model"]["temperature"] = json!(1.9);
    std::fs::write(&record_path, serde_json::to_string(&record).unwrap()).unwrap();

    let before = orchestrator.get_snapshot().unwrap();
    let result = orchestrator
        .rollback_to_version(&saved.record.version_id, "ops", None)
        .await;
    assert!(matches!(result, Err(ConfigError::Integrity { .. })));
    assert_eq!(orchestrator.get_snapshot().unwrap(), before);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_rollback_unknown_version() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;
    let result = orchestrator.rollback_to_version("v999999999999999", "ops", None).await;
    assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_sensitive_update_is_significant() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;
    let mut significant = orchestrator
        .events()
        .subscribe("significant", &[EventKind::AuditSignificantChange])
        .unwrap();

    orchestrator
        .update_value("model.name", json!("claude-opus"), "ops", None)
        .await
        .unwrap();
    // 3600 -> 3000 is well under the relative threshold.
    orchestrator
        .update_value("cache.ttl_seconds", json!(3000), "ops", None)
        .await
        .unwrap();

    let entries = orchestrator.auditor().query(&AuditFilter::default());
    assert_eq!(entries.len(), 2);
    let by_path = |p: &str| {
        entries
            .iter()
            .find(|e| e.path.as_ref().is_some_and(|path| path.to_string() == p))
            .unwrap()
    };
    assert!(by_path("model.name").significant);
    assert!(!by_path("cache.ttl_seconds").significant);

    match significant.recv().await.unwrap() {
        Event::AuditSignificantChange { entry } => assert_eq!(entry.actor, "ops"),
        other => panic!("unexpected event: {:?}", other),
    }
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_audit_log_survives_restart() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    {
        let orchestrator = start(settings.clone(), MapEnv::new()).await;
        orchestrator
            .update_value("persona.max_history", json!(40), "ops", Some("longer memory"))
            .await
            .unwrap();
        orchestrator.save("ops", None).await.unwrap();
        orchestrator.shutdown().await;
    }

    let orchestrator = start(settings, MapEnv::new()).await;
    assert_eq!(orchestrator.persona().unwrap().max_history, 40);
    let entries = orchestrator.auditor().query(&AuditFilter::default());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, AuditAction::Save);
    assert_eq!(entries[1].action, AuditAction::Update);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_import_is_always_significant() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;

    let preview = orchestrator.preview_import("cache:\n  enabled: false\n").unwrap();
    assert_eq!(preview.len(), 1);
    assert!(orchestrator.cache().unwrap().enabled);

    orchestrator
        .import_config("cache:\n  enabled: false\n", "ops", None)
        .await
        .unwrap();
    assert!(!orchestrator.cache().unwrap().enabled);
    let imports = orchestrator.auditor().query(&AuditFilter {
        actions: vec![AuditAction::Import],
        ..Default::default()
    });
    assert_eq!(imports.len(), 1);
    assert!(imports[0].significant);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_migrate_version_applies_transform() {
    let temp = TempDir::new().unwrap();
    let orchestrator = start(settings(&temp), MapEnv::new()).await;
    let saved = orchestrator.save("ops", None).await.unwrap();

    let double_history = |mut tree: Value| -> Result<Value, ConfigError> {
        tree["persona"]["max_history"] = json!(40);
        Ok(tree)
    };
    let outcome = orchestrator
        .migrate_version(&saved.record.version_id, None, Some(&double_history), "ops", None)
        .await
        .unwrap();
    assert_eq!(outcome.diff.len(), 1);
    assert_eq!(orchestrator.persona().unwrap().max_history, 40);
    let migrations = orchestrator.auditor().query(&AuditFilter {
        actions: vec![AuditAction::Migrate],
        ..Default::default()
    });
    assert_eq!(migrations.len(), 1);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp);
    let orchestrator = start(settings.clone(), MapEnv::new()).await;
    orchestrator.shutdown().await;
    orchestrator.shutdown().await;
    assert!(settings.monitor_state_file().exists());
}

#[tokio::test]
async fn test_watcher_reloads_external_edit() {
    let temp = TempDir::new().unwrap();
    let mut settings = ServiceSettings::with_data_dir(temp.path());
    settings.watcher.debounce_ms = 100;
    let orchestrator = start(settings.clone(), MapEnv::new()).await;
    let mut reloads = orchestrator
        .events()
        .subscribe("reloads", &[EventKind::ConfigReloaded])
        .unwrap();

    // Give the watcher a moment to register before editing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let staged = temp.path().join("staged.yaml");
    std::fs::write(&staged, store_document("persona:\n  name: night-shift\n")).unwrap();
    std::fs::rename(&staged, settings.config_file()).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), reloads.recv())
        .await
        .expect("watcher did not trigger a reload")
        .unwrap();
    match event {
        Event::ConfigReloaded { source, diff_count, .. } => {
            assert_eq!(source, ReloadSource::Watcher);
            assert_eq!(diff_count, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(orchestrator.persona().unwrap().name, "night-shift");
    orchestrator.shutdown().await;
}
