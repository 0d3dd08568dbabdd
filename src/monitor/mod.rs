//! Health monitoring.
//!
//! The [`Monitor`] owns a registry of named check predicates. A run executes
//! all of them against one snapshot, folds the results worst-of into an
//! [`AggregateHealth`], and publishes transition events only when the
//! overall status changes. Failing checks raise alerts, rate-limited per
//! check by a cooldown, which in turn drive self-healing hooks.

pub mod checks;
mod heal;
mod health;
mod probe;

pub use checks::{CRITICAL_CHECKS, CheckContext};
pub use heal::{MemoryHealer, Purgeable, SelfHealer};
pub use health::{AggregateHealth, HealthCheckResult, HealthStatus, Severity, Transition, worst_of};
pub use probe::{FixedProbe, MemoryUsage, ProcProbe, ResourceProbe};

use crate::config::{BotConfig, MonitorSettings};
use crate::env::ProcessEnv;
use crate::error::ConfigResult;
use crate::events::{Event, EventBus};
use crate::guard::FlagGuard;
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// A check predicate. Errors and panics become an unhealthy result.
pub type CheckFn = Arc<dyn Fn(&CheckContext<'_>) -> anyhow::Result<HealthCheckResult> + Send + Sync>;

#[derive(Clone)]
struct RegisteredCheck {
    predicate: CheckFn,
    critical: bool,
}

/// Per-kind alert bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub last_fired: Option<DateTime<Utc>>,
    /// Consecutive runs in which the condition was seen.
    pub consecutive: u32,
}

/// Persisted form of the monitor's private state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    pub alerts: BTreeMap<String, AlertState>,
    #[serde(default)]
    pub last_status: Option<HealthStatus>,
}

/// An alert that passed its cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlert {
    pub kind: String,
    pub consecutive: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Monitor {
    checks: RwLock<BTreeMap<String, RegisteredCheck>>,
    healers: RwLock<HashMap<String, Arc<dyn SelfHealer>>>,
    memory_healer: Arc<MemoryHealer>,
    env: Arc<dyn ProcessEnv>,
    probe: Arc<dyn ResourceProbe>,
    settings: MonitorSettings,
    bus: Arc<EventBus>,
    last: Mutex<Option<AggregateHealth>>,
    /// Status the next run is compared against.
    baseline: Mutex<HealthStatus>,
    alerts: Mutex<HashMap<String, AlertState>>,
    polling: AtomicBool,
}

impl Monitor {
    /// An empty monitor: no checks, only the memory healer.
    pub fn new(
        settings: MonitorSettings,
        env: Arc<dyn ProcessEnv>,
        probe: Arc<dyn ResourceProbe>,
        bus: Arc<EventBus>,
    ) -> Self {
        let memory_healer = Arc::new(MemoryHealer::new());
        let mut healers: HashMap<String, Arc<dyn SelfHealer>> = HashMap::new();
        healers.insert(checks::MEMORY.to_string(), memory_healer.clone());

        Self {
            checks: RwLock::new(BTreeMap::new()),
            healers: RwLock::new(healers),
            memory_healer,
            env,
            probe,
            settings,
            bus,
            last: Mutex::new(None),
            baseline: Mutex::new(HealthStatus::Healthy),
            alerts: Mutex::new(HashMap::new()),
            polling: AtomicBool::new(false),
        }
    }

    /// A monitor with every built-in check registered.
    pub fn with_builtin_checks(
        settings: MonitorSettings,
        env: Arc<dyn ProcessEnv>,
        probe: Arc<dyn ResourceProbe>,
        bus: Arc<EventBus>,
    ) -> Self {
        let monitor = Self::new(settings, env, probe, bus);
        monitor.register_critical_check(checks::CREDENTIALS, checks::credentials);
        monitor.register_critical_check(checks::RATE_LIMITS, checks::rate_limits);
        monitor.register_critical_check(checks::REQUIRED_CAPABILITIES_CHECK, checks::required_capabilities);
        monitor.register_check(checks::MEMORY, checks::memory);
        monitor.register_check(checks::FEATURE_CONSISTENCY, checks::feature_consistency);
        monitor.register_check(checks::MODEL_PARAMETERS, checks::model_parameters);
        monitor.register_check(checks::TIMEOUTS, checks::timeouts);
        monitor
    }

    /// Register (or replace) a check.
    pub fn register_check<F>(&self, name: &str, predicate: F)
    where
        F: Fn(&CheckContext<'_>) -> anyhow::Result<HealthCheckResult> + Send + Sync + 'static,
    {
        self.insert_check(name, Arc::new(predicate), false);
    }

    /// Register a check whose failure blocks a production start.
    pub fn register_critical_check<F>(&self, name: &str, predicate: F)
    where
        F: Fn(&CheckContext<'_>) -> anyhow::Result<HealthCheckResult> + Send + Sync + 'static,
    {
        self.insert_check(name, Arc::new(predicate), true);
    }

    fn insert_check(&self, name: &str, predicate: CheckFn, critical: bool) {
        let replaced = self
            .checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), RegisteredCheck { predicate, critical })
            .is_some();
        debug!(check = name, critical, replaced, "Registered health check");
    }

    /// Remove a check. Returns `true` if it was registered.
    pub fn unregister_check(&self, name: &str) -> bool {
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_critical(&self, name: &str) -> bool {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .is_some_and(|c| c.critical)
    }

    pub fn register_healer(&self, kind: &str, healer: Arc<dyn SelfHealer>) {
        self.healers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.to_string(), healer);
    }

    /// The built-in memory healer, for registering purgeable caches.
    pub fn memory_healer(&self) -> Arc<MemoryHealer> {
        Arc::clone(&self.memory_healer)
    }

    /// Most recent aggregate, if any run has completed.
    pub fn last_health(&self) -> Option<AggregateHealth> {
        lock(&self.last).clone()
    }

    /// Run every check against `config` and publish transition events.
    pub fn run_checks(&self, config: &BotConfig) -> AggregateHealth {
        let registered: Vec<(String, RegisteredCheck)> = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, check)| (name.clone(), check.clone()))
            .collect();

        let ctx = CheckContext {
            config,
            env: self.env.as_ref(),
            probe: self.probe.as_ref(),
            settings: &self.settings,
        };

        let results: Vec<HealthCheckResult> = registered
            .iter()
            .map(|(name, check)| run_one(name, check, &ctx))
            .collect();
        let health = AggregateHealth::from_results(results);

        let previous = {
            let mut baseline = lock(&self.baseline);
            std::mem::replace(&mut *baseline, health.status)
        };
        *lock(&self.last) = Some(health.clone());

        if let Some(transition) = Transition::between(previous, health.status) {
            self.publish_transition(transition, &health);
        }
        health
    }

    fn publish_transition(&self, transition: Transition, health: &AggregateHealth) {
        info!(from = %transition.from, to = %transition.to, "Health status changed");
        self.bus.publish(Event::HealthChanged {
            health: health.clone(),
        });
        let failing: Vec<HealthCheckResult> = health.failing().cloned().collect();
        if transition.is_degradation() {
            self.bus.publish(Event::HealthDegraded { results: failing.clone() });
        }
        if transition.is_unhealthy() {
            self.bus.publish(Event::HealthUnhealthy { results: failing });
        }
        if transition.is_recovery() {
            self.bus.publish(Event::HealthRecovered {
                health: health.clone(),
            });
        }
    }

    /// Record one occurrence of an alert condition.
    ///
    /// The consecutive counter always advances. The alert itself fires (an
    /// event is published) only if the kind's cooldown has elapsed. Returns
    /// the counter when the alert fired.
    pub fn fire_alert(&self, kind: &str, result: &HealthCheckResult) -> Option<u32> {
        let now = Utc::now();
        let consecutive = {
            let mut alerts = lock(&self.alerts);
            let state = alerts.entry(kind.to_string()).or_default();
            state.consecutive = state.consecutive.saturating_add(1);
            let cooled = state
                .last_fired
                .is_none_or(|last| now - last >= self.settings.alert_cooldown());
            if !cooled {
                debug!(kind, consecutive = state.consecutive, "Alert suppressed by cooldown");
                return None;
            }
            state.last_fired = Some(now);
            state.consecutive
        };

        warn!(kind, consecutive, message = %result.message, "Health alert");
        self.bus.publish(Event::HealthAlert {
            kind: kind.to_string(),
            consecutive,
            result: result.clone(),
        });
        Some(consecutive)
    }

    /// Raise alerts for failing checks and reset counters of passing ones.
    /// Fired alerts trigger their self-healer.
    pub async fn evaluate_alerts(&self, health: &AggregateHealth) -> Vec<FiredAlert> {
        let mut fired = Vec::new();
        for result in &health.results {
            if result.is_healthy() {
                if let Some(state) = lock(&self.alerts).get_mut(&result.name) {
                    state.consecutive = 0;
                }
                continue;
            }
            if let Some(consecutive) = self.fire_alert(&result.name, result) {
                fired.push(FiredAlert {
                    kind: result.name.clone(),
                    consecutive,
                });
            }
        }
        for alert in &fired {
            self.self_heal(&alert.kind, alert.consecutive).await;
        }
        fired
    }

    /// Run the healer registered for `kind`. Failures and panics are logged only.
    pub async fn self_heal(&self, kind: &str, consecutive: u32) {
        let healer = self
            .healers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned();
        let Some(healer) = healer else {
            debug!(kind, "No self-healer registered");
            return;
        };
        // Run on its own task so a panicking healer surfaces as a JoinError.
        let task_kind = kind.to_string();
        let outcome = tokio::spawn(async move { healer.heal(&task_kind, consecutive).await }).await;
        match outcome {
            Ok(Ok(outcome)) => info!(kind, consecutive, outcome = %outcome, "Self-heal completed"),
            Ok(Err(e)) => warn!(kind, consecutive, "Self-heal failed: {:#}", e),
            Err(e) if e.is_panic() => error!(kind, consecutive, "Self-heal panicked"),
            Err(e) => warn!(kind, consecutive, "Self-heal did not complete: {}", e),
        }
    }

    /// One poll: run checks, then evaluate alerts. `None` if a poll is
    /// already in progress.
    pub async fn poll_once(&self, config: &BotConfig) -> Option<AggregateHealth> {
        let Some(_guard) = FlagGuard::try_acquire(&self.polling) else {
            debug!("Health poll already running, skipping");
            return None;
        };
        let health = self.run_checks(config);
        self.evaluate_alerts(&health).await;
        Some(health)
    }

    pub fn alert_state(&self, kind: &str) -> Option<AlertState> {
        lock(&self.alerts).get(kind).cloned()
    }

    pub fn export_state(&self) -> MonitorState {
        MonitorState {
            alerts: lock(&self.alerts)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            last_status: lock(&self.last).as_ref().map(|h| h.status),
        }
    }

    /// Replace alert state wholesale, e.g. after a restart.
    pub fn restore_state(&self, state: MonitorState) {
        *lock(&self.alerts) = state.alerts.into_iter().collect();
        if let Some(status) = state.last_status {
            *lock(&self.baseline) = status;
        }
    }

    pub fn save_state(&self, path: &Path) -> ConfigResult<()> {
        store::write_json(path, &self.export_state())
    }

    /// Restore from `path`. Returns `false` when there was nothing to load.
    pub fn load_state(&self, path: &Path) -> ConfigResult<bool> {
        match store::read_json::<MonitorState>(path)? {
            Some(state) => {
                debug!(alerts = state.alerts.len(), "Restored monitor state");
                self.restore_state(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Execute one predicate, converting errors and panics into results.
fn run_one(name: &str, check: &RegisteredCheck, ctx: &CheckContext<'_>) -> HealthCheckResult {
    let outcome = catch_unwind(AssertUnwindSafe(|| (check.predicate)(ctx)));
    let mut result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(check = name, "Health check failed: {:#}", e);
            HealthCheckResult::unhealthy(name, format!("check failed: {:#}", e))
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!(check = name, "Health check panicked: {}", detail);
            HealthCheckResult::unhealthy(name, format!("check panicked: {}", detail))
        }
    };
    result.name = name.to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn monitor(bus: Arc<EventBus>, cooldown_secs: u64) -> Monitor {
        let settings = MonitorSettings {
            alert_cooldown_secs: cooldown_secs,
            ..MonitorSettings::default()
        };
        Monitor::new(settings, Arc::new(MapEnv::new()), Arc::new(FixedProbe(None)), bus)
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[test]
    fn test_raising_check_is_contained() {
        let m = monitor(Arc::new(EventBus::new()), 300);
        m.register_check("explodes", |_ctx: &CheckContext<'_>| anyhow::bail!("no backend"));
        m.register_check("panics", |_ctx: &CheckContext<'_>| panic!("boom"));
        m.register_check("fine", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::healthy("ignored", "ok")));

        let health = m.run_checks(&BotConfig::default());
        assert_eq!(health.results.len(), 3);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.result("explodes").unwrap().status, HealthStatus::Unhealthy);
        assert!(health.result("panics").unwrap().message.contains("boom"));
        // Registered name wins over the name a predicate reports.
        assert!(health.result("fine").unwrap().is_healthy());
    }

    #[test]
    fn test_transition_events_only_on_change() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe("test", &[]).unwrap();
        let m = monitor(Arc::clone(&bus), 300);
        let config = BotConfig::default();

        m.register_check("flaky", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::healthy("flaky", "ok")));
        m.run_checks(&config);
        assert!(drain(&mut rx).is_empty());

        m.register_check("flaky", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::degraded("flaky", "slow")));
        m.run_checks(&config);
        assert_eq!(drain(&mut rx), vec![EventKind::HealthChanged, EventKind::HealthDegraded]);

        m.run_checks(&config);
        assert!(drain(&mut rx).is_empty());

        m.register_check("flaky", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::unhealthy("flaky", "down")));
        m.run_checks(&config);
        assert_eq!(drain(&mut rx), vec![EventKind::HealthChanged, EventKind::HealthUnhealthy]);

        m.unregister_check("flaky");
        m.run_checks(&config);
        assert_eq!(drain(&mut rx), vec![EventKind::HealthChanged, EventKind::HealthRecovered]);
    }

    #[test]
    fn test_cooldown_suppresses_repeat_alert() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe("alerts", &[EventKind::HealthAlert]).unwrap();
        let m = monitor(Arc::clone(&bus), 300);
        let result = HealthCheckResult::unhealthy("memory", "full");

        assert_eq!(m.fire_alert("memory", &result), Some(1));
        assert_eq!(m.fire_alert("memory", &result), None);
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(m.alert_state("memory").unwrap().consecutive, 2);

        // Independent kinds have independent cooldowns.
        assert_eq!(m.fire_alert("timeouts", &result), Some(1));
    }

    #[test]
    fn test_zero_cooldown_fires_every_time() {
        let m = monitor(Arc::new(EventBus::new()), 0);
        let result = HealthCheckResult::unhealthy("memory", "full");
        assert_eq!(m.fire_alert("memory", &result), Some(1));
        assert_eq!(m.fire_alert("memory", &result), Some(2));
    }

    struct RecordingHealer(AtomicU32);

    #[async_trait]
    impl SelfHealer for RecordingHealer {
        async fn heal(&self, _kind: &str, consecutive: u32) -> anyhow::Result<String> {
            self.0.store(consecutive, Ordering::SeqCst);
            Ok("noted".to_string())
        }
    }

    struct FailingHealer;

    #[async_trait]
    impl SelfHealer for FailingHealer {
        async fn heal(&self, _kind: &str, _consecutive: u32) -> anyhow::Result<String> {
            anyhow::bail!("cannot heal")
        }
    }

    #[tokio::test]
    async fn test_alerts_drive_self_heal_and_reset() {
        let m = monitor(Arc::new(EventBus::new()), 0);
        let healer = Arc::new(RecordingHealer(AtomicU32::new(0)));
        m.register_healer("disk", healer.clone());
        m.register_healer("broken", Arc::new(FailingHealer));
        m.register_check("disk", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::degraded("disk", "low")));
        m.register_check("broken", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::degraded("broken", "x")));

        let config = BotConfig::default();
        m.poll_once(&config).await.unwrap();
        let health = m.poll_once(&config).await.unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(healer.0.load(Ordering::SeqCst), 2);

        m.register_check("disk", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::healthy("disk", "ok")));
        m.poll_once(&config).await.unwrap();
        assert_eq!(m.alert_state("disk").unwrap().consecutive, 0);
    }

    struct PanickingHealer;

    #[async_trait]
    impl SelfHealer for PanickingHealer {
        async fn heal(&self, _kind: &str, _consecutive: u32) -> anyhow::Result<String> {
            panic!("healer blew up")
        }
    }

    #[tokio::test]
    async fn test_panicking_healer_is_contained() {
        let m = monitor(Arc::new(EventBus::new()), 0);
        m.register_healer("cache", Arc::new(PanickingHealer));
        m.register_check("cache", |_ctx: &CheckContext<'_>| Ok(HealthCheckResult::unhealthy("cache", "stale")));

        let config = BotConfig::default();
        let health = m.poll_once(&config).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(m.alert_state("cache").unwrap().consecutive, 1);

        // The poll guard was released and the next poll still alerts.
        assert!(m.poll_once(&config).await.is_some());
        assert_eq!(m.alert_state("cache").unwrap().consecutive, 2);
    }

    #[test]
    fn test_state_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("monitor-state.json");

        let m = monitor(Arc::new(EventBus::new()), 300);
        m.fire_alert("memory", &HealthCheckResult::unhealthy("memory", "full"));
        m.save_state(&path).unwrap();

        let restored = monitor(Arc::new(EventBus::new()), 300);
        assert!(restored.load_state(&path).unwrap());
        assert_eq!(restored.alert_state("memory"), m.alert_state("memory"));
        // Cooldown survives the restart.
        assert_eq!(
            restored.fire_alert("memory", &HealthCheckResult::unhealthy("memory", "full")),
            None
        );
    }

    #[test]
    fn test_builtin_checks_registered() {
        let m = Monitor::with_builtin_checks(
            MonitorSettings::default(),
            Arc::new(MapEnv::new()),
            Arc::new(FixedProbe(None)),
            Arc::new(EventBus::new()),
        );
        assert_eq!(m.check_names().len(), 7);
        for name in CRITICAL_CHECKS {
            assert!(m.is_critical(name));
        }
        assert!(!m.is_critical(checks::MEMORY));

        // No credentials in an empty environment.
        let health = m.run_checks(&BotConfig::default());
        assert_eq!(health.result(checks::CREDENTIALS).unwrap().status, HealthStatus::Unhealthy);
        assert!(health.result(checks::RATE_LIMITS).unwrap().is_healthy());
    }
}
