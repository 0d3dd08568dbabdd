//! File watcher for the persisted snapshot.
//!
//! Watches the data directory and emits change events through a tokio watch
//! channel when the snapshot document is edited. Debouncing coalesces rapid
//! successive writes (including the stage-and-rename of an atomic write)
//! into a single event.

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How often the blocking event loop checks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Event types emitted when watched files change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChangeEvent {
    /// The snapshot document changed.
    SnapshotChanged(PathBuf),
    /// Watcher encountered an error
    Error(String),
}

impl ConfigChangeEvent {
    /// Returns true if this event requires a reload.
    pub fn requires_reload(&self) -> bool {
        !matches!(self, ConfigChangeEvent::Error(_))
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Stability window for coalescing rapid changes.
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// What to watch.
#[derive(Debug, Clone)]
pub struct WatchPaths {
    /// Directory holding the snapshot document.
    pub data_dir: PathBuf,
    /// File name of the snapshot document inside `data_dir`.
    pub config_file: String,
}

/// Handle to control the config watcher.
pub struct ConfigWatcherHandle {
    /// Receiver for change events. Clone it to fan out to several consumers.
    pub events: watch::Receiver<Option<ConfigChangeEvent>>,
    stop: Arc<AtomicBool>,
    task_handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcherHandle {
    /// Wait for the next change event. `None` once the watcher has stopped.
    pub async fn wait_for_change(&mut self) -> Option<ConfigChangeEvent> {
        loop {
            if self.events.changed().await.is_err() {
                return None;
            }
            let event = self.events.borrow_and_update().clone();
            if event.is_some() {
                return event;
            }
        }
    }

    /// Check if there's a pending change without blocking.
    pub fn has_pending_change(&self) -> bool {
        self.events.has_changed().unwrap_or(false)
    }

    /// Stop watching and wait for the event loop to exit.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.task_handle.await {
            warn!("Config watcher task ended abnormally: {}", e);
        }
    }
}

/// Starts the configuration file watcher.
///
/// # Example
/// ```ignore
/// let paths = WatchPaths {
///     data_dir: PathBuf::from("./config-sentinel/data"),
///     config_file: "bot-config.yaml".to_string(),
/// };
/// let mut handle = start_config_watcher(paths, WatcherConfig::default())?;
/// while let Some(event) = handle.wait_for_change().await {
///     println!("Config changed: {:?}", event);
/// }
/// ```
pub fn start_config_watcher(
    paths: WatchPaths,
    config: WatcherConfig,
) -> Result<ConfigWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(config.debounce_duration, notify_tx)?;

    // Watch the directory, not the file: atomic replacement swaps the inode.
    debouncer
        .watcher()
        .watch(&paths.data_dir, notify::RecursiveMode::NonRecursive)?;
    info!(
        dir = %paths.data_dir.display(),
        debounce_ms = config.debounce_duration.as_millis() as u64,
        "Watching configuration directory"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let task_handle = tokio::task::spawn_blocking(move || {
        // Keep the debouncer alive for as long as the loop runs.
        let _debouncer = debouncer;
        process_notify_events(notify_rx, event_tx, &paths, &stop_flag);
    });

    Ok(ConfigWatcherHandle {
        events: event_rx,
        stop,
        task_handle,
    })
}

/// Process events from the notify debouncer and convert to ConfigChangeEvents.
fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<ConfigChangeEvent>>,
    paths: &WatchPaths,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            info!("Config watcher stopped");
            return;
        }
        match rx.recv_timeout(STOP_POLL) {
            Ok(Ok(events)) => {
                if let Some(event) = classify_events(events, paths) {
                    debug!("Config change detected: {:?}", event);
                    if tx.send(Some(event)).is_err() {
                        info!("Config watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                error!("File watcher error: {}", e);
                let _ = tx.send(Some(ConfigChangeEvent::Error(e.to_string())));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("Config watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Collapse a debounced batch into at most one event.
fn classify_events(
    events: Vec<notify_debouncer_mini::DebouncedEvent>,
    paths: &WatchPaths,
) -> Option<ConfigChangeEvent> {
    events
        .into_iter()
        .filter(|event| {
            matches!(
                event.kind,
                DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
            )
        })
        .find_map(|event| classify_path(&event.path, paths))
}

/// Classify a single path.
fn classify_path(path: &Path, paths: &WatchPaths) -> Option<ConfigChangeEvent> {
    let file_name = path.file_name().and_then(|n| n.to_str())?;
    if file_name == paths.config_file {
        return Some(ConfigChangeEvent::SnapshotChanged(path.to_path_buf()));
    }
    // Staging files, version records and audit logs are ours; ignore them.
    None
}
