//! Publish/subscribe bus for configuration and health events.
//!
//! Subscribers register under a unique name with the set of event kinds they
//! care about and receive events on an unbounded channel. Registration and
//! removal are symmetric and idempotent. A subscriber whose receiver has been
//! dropped is pruned the next time an event it would receive is published.

use crate::audit::AuditEntry;
use crate::config::PathDiff;
use crate::monitor::{AggregateHealth, HealthCheckResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Categories of events, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    ConfigChanged,
    ConfigReloaded,
    ConfigError,
    ConfigRolledBack,
    HealthChanged,
    HealthDegraded,
    HealthUnhealthy,
    HealthRecovered,
    HealthAlert,
    AuditSignificantChange,
}

impl EventKind {
    /// Dotted event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConfigChanged => "config.changed",
            EventKind::ConfigReloaded => "config.reloaded",
            EventKind::ConfigError => "config.error",
            EventKind::ConfigRolledBack => "config.rolledBack",
            EventKind::HealthChanged => "health.changed",
            EventKind::HealthDegraded => "health.degraded",
            EventKind::HealthUnhealthy => "health.unhealthy",
            EventKind::HealthRecovered => "health.recovered",
            EventKind::HealthAlert => "health.alert",
            EventKind::AuditSignificantChange => "audit.significantChange",
        }
    }

    pub const ALL: &'static [EventKind] = &[
        EventKind::ConfigChanged,
        EventKind::ConfigReloaded,
        EventKind::ConfigError,
        EventKind::ConfigRolledBack,
        EventKind::HealthChanged,
        EventKind::HealthDegraded,
        EventKind::HealthUnhealthy,
        EventKind::HealthRecovered,
        EventKind::HealthAlert,
        EventKind::AuditSignificantChange,
    ];
}

/// Where a reload was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadSource {
    /// The file watcher saw an external edit.
    Watcher,
    /// An explicit API or CLI call.
    Manual,
    /// First load during initialize.
    Startup,
}

impl std::fmt::Display for ReloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadSource::Watcher => write!(f, "watcher"),
            ReloadSource::Manual => write!(f, "manual"),
            ReloadSource::Startup => write!(f, "startup"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Leaf-level changes committed to the current snapshot.
    ConfigChanged { diffs: Vec<PathDiff> },
    ConfigReloaded {
        version_id: String,
        diff_count: usize,
        source: ReloadSource,
    },
    /// A reload or mutation failed; the previous snapshot is still current.
    ConfigError { message: String },
    ConfigRolledBack { from: String, to: String },
    HealthChanged { health: AggregateHealth },
    HealthDegraded { results: Vec<HealthCheckResult> },
    HealthUnhealthy { results: Vec<HealthCheckResult> },
    HealthRecovered { health: AggregateHealth },
    HealthAlert {
        kind: String,
        consecutive: u32,
        result: HealthCheckResult,
    },
    AuditSignificantChange { entry: AuditEntry },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConfigChanged { .. } => EventKind::ConfigChanged,
            Event::ConfigReloaded { .. } => EventKind::ConfigReloaded,
            Event::ConfigError { .. } => EventKind::ConfigError,
            Event::ConfigRolledBack { .. } => EventKind::ConfigRolledBack,
            Event::HealthChanged { .. } => EventKind::HealthChanged,
            Event::HealthDegraded { .. } => EventKind::HealthDegraded,
            Event::HealthUnhealthy { .. } => EventKind::HealthUnhealthy,
            Event::HealthRecovered { .. } => EventKind::HealthRecovered,
            Event::HealthAlert { .. } => EventKind::HealthAlert,
            Event::AuditSignificantChange { .. } => EventKind::AuditSignificantChange,
        }
    }
}

struct Subscriber {
    /// `None` receives every kind.
    kinds: Option<HashSet<EventKind>>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }
}

/// Fan-out of events to named subscribers.
///
/// Thread-safe: uses an internal `Mutex` so it can be shared across async
/// tasks without requiring `&mut self`. The lock is never held across an
/// await point.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `name` to `kinds` (empty means every kind).
    ///
    /// Returns `None` if `name` is already subscribed; the existing
    /// subscription is left untouched.
    pub fn subscribe(
        &self,
        name: &str,
        kinds: &[EventKind],
    ) -> Option<mpsc::UnboundedReceiver<Event>> {
        let mut subscribers = self.lock();
        if subscribers.contains_key(name) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let kinds = (!kinds.is_empty()).then(|| kinds.iter().copied().collect());
        subscribers.insert(name.to_string(), Subscriber { kinds, tx });
        Some(rx)
    }

    /// Remove a subscription. Returns `true` if it was present.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver an event to every interested subscriber. Returns how many
    /// received it.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let mut subscribers = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (name, subscriber) in subscribers.iter() {
            if !subscriber.wants(kind) {
                continue;
            }
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(name.clone());
            }
        }

        for name in closed {
            debug!(subscriber = %name, "Pruning closed event subscriber");
            subscribers.remove(&name);
        }

        debug!(event = kind.name(), delivered, "Published event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_event() -> Event {
        Event::ConfigError {
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let rx = bus.subscribe("cache", &[]);
        assert!(rx.is_some());
        assert!(bus.is_subscribed("cache"));

        // Duplicate subscribe is a no-op
        assert!(bus.subscribe("cache", &[EventKind::ConfigChanged]).is_none());
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe("cache"));
        assert!(!bus.unsubscribe("cache"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_kind_filter() {
        let bus = EventBus::new();
        let mut errors = bus.subscribe("errors", &[EventKind::ConfigError]).unwrap();
        let mut rollbacks = bus
            .subscribe("rollbacks", &[EventKind::ConfigRolledBack])
            .unwrap();

        assert_eq!(bus.publish(error_event()), 1);
        assert!(matches!(errors.try_recv(), Ok(Event::ConfigError { .. })));
        assert!(rollbacks.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe("gone", &[]).unwrap();
        drop(rx);
        assert_eq!(bus.publish(error_event()), 0);
        assert!(!bus.is_subscribed("gone"));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::ConfigRolledBack.name(), "config.rolledBack");
        assert_eq!(EventKind::AuditSignificantChange.name(), "audit.significantChange");
        assert_eq!(EventKind::ALL.len(), 10);
        assert_eq!(error_event().kind(), EventKind::ConfigError);
    }
}
