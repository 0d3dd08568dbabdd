//! Append-only audit log.
//!
//! Entries are kept in memory, oldest first, and persisted by a background
//! writer task that rewrites `audit-log.json` atomically. When the rewrite
//! keeps failing after bounded retries, the unpersisted entries are appended
//! to `audit-fallback.jsonl` instead; they are folded back into the main log
//! the next time it is opened. The in-memory log is authoritative either way.

mod analytics;
mod entry;
mod significance;

pub use analytics::{AuditAnalytics, ComplianceFinding, ComplianceReport, analyze, compliance_check};
pub use entry::{AuditAction, AuditDraft, AuditEntry};
pub use significance::{SignificancePolicy, relative_change};

use crate::config::{AuditSettings, BotConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::events::{Event, EventBus};
use crate::guard::FlagGuard;
use crate::store;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const LOG_FILE: &str = "audit-log.json";
pub const FALLBACK_FILE: &str = "audit-fallback.jsonl";

/// Entries trimmed beyond the cap in one pass, so trimming is not repeated
/// on every insert. A tuning constant.
pub const TRIM_MARGIN: usize = 100;

const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

/// Query filters. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Any of these actions; empty matches all.
    pub actions: Vec<AuditAction>,
    pub path_contains: Option<String>,
    pub actor: Option<String>,
    pub significant: Option<bool>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp > until) {
            return false;
        }
        if !self.actions.is_empty() && !self.actions.contains(&entry.action) {
            return false;
        }
        if let Some(needle) = &self.path_contains {
            match &entry.path {
                Some(path) if path.to_string().contains(needle.as_str()) => {}
                _ => return false,
            }
        }
        if self.actor.as_ref().is_some_and(|actor| &entry.actor != actor) {
            return false;
        }
        if self.significant.is_some_and(|s| entry.significant != s) {
            return false;
        }
        true
    }
}

enum WriteRequest {
    /// A new entry; persist the log and remember it for the fallback path.
    Entry(AuditEntry),
    /// Entries were removed; persist the log.
    Rewrite,
    Flush(oneshot::Sender<()>),
    Shutdown,
}

type SharedEntries = Arc<Mutex<VecDeque<AuditEntry>>>;

fn lock(entries: &Mutex<VecDeque<AuditEntry>>) -> MutexGuard<'_, VecDeque<AuditEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Auditor {
    entries: SharedEntries,
    policy: SignificancePolicy,
    settings: AuditSettings,
    bus: Arc<EventBus>,
    significant: Arc<Notify>,
    writer_tx: mpsc::UnboundedSender<WriteRequest>,
    writer: Mutex<Option<JoinHandle<()>>>,
    sweep_running: AtomicBool,
}

impl Auditor {
    /// Open the log in `dir` and start the writer task. Must be called
    /// within a tokio runtime.
    pub fn open(dir: impl Into<PathBuf>, settings: AuditSettings, bus: Arc<EventBus>) -> ConfigResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::persistence(&dir, e))?;
        let log_path = dir.join(LOG_FILE);
        let fallback_path = dir.join(FALLBACK_FILE);

        let (loaded, recovered) = load_entries(&log_path, &fallback_path)?;
        info!(entries = loaded.len(), recovered, "Opened audit log");
        let entries: SharedEntries = Arc::new(Mutex::new(loaded));

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(
            writer_rx,
            Arc::clone(&entries),
            log_path,
            fallback_path.clone(),
            settings.persist_retries,
        ));

        if recovered > 0 {
            // Fold recovered entries into the main log before dropping the fallback.
            let _ = writer_tx.send(WriteRequest::Rewrite);
        }

        Ok(Self {
            entries,
            policy: SignificancePolicy::from_settings(&settings),
            settings,
            bus,
            significant: Arc::new(Notify::new()),
            writer_tx,
            writer: Mutex::new(Some(writer)),
            sweep_running: AtomicBool::new(false),
        })
    }

    /// Signalled whenever a significant entry is recorded.
    pub fn significant_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.significant)
    }

    pub fn policy(&self) -> &SignificancePolicy {
        &self.policy
    }

    /// Classify, append and schedule persistence of an entry.
    ///
    /// Never fails: persistence problems are handled by the writer task.
    pub fn record(&self, draft: AuditDraft) -> AuditEntry {
        let significant = self.policy.is_significant(&draft);
        let entry = draft.into_entry(significant);

        let trimmed = {
            let mut entries = lock(&self.entries);
            entries.push_back(entry.clone());
            trim_to_cap(&mut entries, self.settings.max_entries)
        };
        if trimmed > 0 {
            debug!(trimmed, "Trimmed audit log to cap");
        }

        if self.writer_tx.send(WriteRequest::Entry(entry.clone())).is_err() {
            warn!(id = %entry.id, "Audit writer stopped; entry kept in memory only");
        }

        debug!(
            action = %entry.action,
            path = %entry.path.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            significant,
            "Recorded audit entry"
        );
        if significant {
            self.bus.publish(Event::AuditSignificantChange { entry: entry.clone() });
            self.significant.notify_one();
        }
        entry
    }

    /// Matching entries, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = lock(&self.entries);
        let matching = entries.iter().rev().filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn analytics(&self, filter: &AuditFilter) -> AuditAnalytics {
        analyze(&self.query(filter))
    }

    pub fn compliance_check(&self, snapshot: &BotConfig) -> ComplianceReport {
        compliance_check(snapshot, &self.query(&AuditFilter::default()), Utc::now())
    }

    /// Purge entries older than the retention age. Returns how many were
    /// removed; zero if a sweep is already running.
    pub fn sweep(&self) -> usize {
        let Some(_guard) = FlagGuard::try_acquire(&self.sweep_running) else {
            return 0;
        };
        let cutoff = Utc::now() - Duration::days(self.settings.max_age_days);
        let removed = {
            let mut entries = lock(&self.entries);
            let before = entries.len();
            entries.retain(|e| e.timestamp >= cutoff);
            before - entries.len()
        };
        if removed > 0 {
            info!(removed, "Swept expired audit entries");
            let _ = self.writer_tx.send(WriteRequest::Rewrite);
        }
        removed
    }

    /// Wait until every entry recorded so far has been handled by the writer.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer_tx.send(WriteRequest::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Flush and stop the writer task. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else { return };
        let _ = self.writer_tx.send(WriteRequest::Shutdown);
        if let Err(e) = handle.await {
            error!("Audit writer task failed: {}", e);
        }
    }
}

/// Drop the oldest entries once `cap` is exceeded, plus [`TRIM_MARGIN`].
fn trim_to_cap(entries: &mut VecDeque<AuditEntry>, cap: usize) -> usize {
    if entries.len() <= cap {
        return 0;
    }
    let excess = (entries.len() - cap + TRIM_MARGIN).min(entries.len());
    entries.drain(..excess);
    excess
}

/// Load the main log plus any fallback entries it is missing.
fn load_entries(log_path: &Path, fallback_path: &Path) -> ConfigResult<(VecDeque<AuditEntry>, usize)> {
    let mut entries: Vec<AuditEntry> = match store::read_json(log_path) {
        Ok(entries) => entries.unwrap_or_default(),
        Err(ConfigError::Parse { message, .. }) => {
            let aside = log_path.with_extension(format!("corrupt-{}", Utc::now().timestamp()));
            warn!(
                path = %log_path.display(),
                moved_to = %aside.display(),
                "Audit log unreadable ({}); starting a new one",
                message
            );
            std::fs::rename(log_path, &aside).map_err(|e| ConfigError::persistence(log_path, e))?;
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let mut recovered = 0;
    match std::fs::read_to_string(fallback_path) {
        Ok(content) => {
            let known: HashSet<_> = entries.iter().map(|e| e.id).collect();
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<AuditEntry>(line) {
                    Ok(entry) if !known.contains(&entry.id) => {
                        entries.push(entry);
                        recovered += 1;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable fallback audit line: {}", e),
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %fallback_path.display(), "Cannot read audit fallback: {}", e),
    }

    entries.sort_by_key(|e| e.timestamp);
    Ok((entries.into(), recovered))
}

async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    entries: SharedEntries,
    log_path: PathBuf,
    fallback_path: PathBuf,
    retries: u32,
) {
    let mut pending: Vec<AuditEntry> = Vec::new();
    let mut dirty = false;

    while let Some(request) = rx.recv().await {
        let mut acks = Vec::new();
        let mut stop = false;
        // Coalesce everything already queued into one write.
        let mut next = Some(request);
        while let Some(request) = next {
            match request {
                WriteRequest::Entry(entry) => {
                    pending.push(entry);
                    dirty = true;
                }
                WriteRequest::Rewrite => dirty = true,
                WriteRequest::Flush(ack) => acks.push(ack),
                WriteRequest::Shutdown => stop = true,
            }
            next = rx.try_recv().ok();
        }

        if dirty {
            persist(&entries, &log_path, &fallback_path, &mut pending, retries).await;
            dirty = false;
        }
        for ack in acks {
            let _ = ack.send(());
        }
        if stop {
            debug!("Audit writer stopped");
            return;
        }
    }
}

async fn persist(
    entries: &SharedEntries,
    log_path: &Path,
    fallback_path: &Path,
    pending: &mut Vec<AuditEntry>,
    retries: u32,
) {
    let attempts = retries.max(1);
    for attempt in 1..=attempts {
        let snapshot: Vec<AuditEntry> = lock(entries).iter().cloned().collect();
        match store::write_json(log_path, &snapshot) {
            Ok(()) => {
                pending.clear();
                if fallback_path.exists() {
                    // Everything in the fallback is now part of the main log.
                    if let Err(e) = std::fs::remove_file(fallback_path) {
                        warn!("Failed to remove audit fallback: {}", e);
                    }
                }
                return;
            }
            Err(e) => {
                warn!(attempt, attempts, "Audit log write failed: {}", e);
                if attempt < attempts {
                    tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
                }
            }
        }
    }

    error!(entries = pending.len(), "Audit log write exhausted retries; using fallback");
    for entry in pending.drain(..) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!(id = %entry.id, "Cannot serialize audit entry: {}", e);
                continue;
            }
        };
        if let Err(e) = store::append_line(fallback_path, &line) {
            error!(id = %entry.id, "Audit fallback write failed: {}", e);
        }
    }
}
