//! Version archive: id minting, content hashing, retention and rollback.
//!
//! Every published snapshot is archived as `versions/<id>.json`. Records are
//! created exclusively and never rewritten. Ids are time-derived and fixed
//! width, so lexical order is creation order.

use crate::config::{BOOKKEEPING_KEYS, BotConfig, VersionSettings, validate_into};
use crate::error::{ConfigError, ConfigResult};
use crate::guard::FlagGuard;
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const ID_DIGITS: usize = 15;

/// An archived snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionRecord {
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the canonical snapshot content, hex encoded.
    pub hash: String,
    pub snapshot: BotConfig,
}

/// Archived content fetched, verified and relabelled under a fresh id.
#[derive(Debug, Clone)]
pub struct RestoredVersion {
    pub restored_from: String,
    pub version_id: String,
    pub snapshot: BotConfig,
    pub hash: String,
}

/// Caller-supplied rewrite applied during [`Migrator::migrate`].
pub type Transform<'a> = &'a (dyn Fn(Value) -> ConfigResult<Value> + Send + Sync);

pub struct Migrator {
    dir: PathBuf,
    settings: VersionSettings,
    /// Millisecond component of the last id handed out.
    last_issued: AtomicU64,
    cleanup_running: AtomicBool,
}

impl Migrator {
    /// Open the archive at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>, settings: VersionSettings) -> ConfigResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::persistence(&dir, e))?;

        let last = list_ids(&dir)?
            .iter()
            .filter_map(|id| parse_version_id(id))
            .max()
            .unwrap_or(0);
        debug!(dir = %dir.display(), last_issued = last, "Opened version archive");

        Ok(Self {
            dir,
            settings,
            last_issued: AtomicU64::new(last),
            cleanup_running: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mint a version id strictly greater than every id issued or archived.
    pub fn generate_version_id(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last_issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(if now > last { now } else { last + 1 })
            })
            .unwrap_or(now);
        let issued = if now > previous { now } else { previous + 1 };
        format_version_id(issued)
    }

    /// Archive a snapshot under its `meta.version`, minting one if unset.
    ///
    /// Fails with `Persistence` rather than overwrite an existing record.
    pub async fn archive(&self, snapshot: &BotConfig) -> ConfigResult<VersionRecord> {
        let snapshot = match snapshot.meta.version.as_deref() {
            Some(id) if parse_version_id(id).is_some() => snapshot.clone(),
            _ => {
                let id = self.generate_version_id();
                let by = snapshot.meta.updated_by.clone().unwrap_or_else(|| "system".to_string());
                snapshot.relabelled(&id, &by)
            }
        };
        let version_id = snapshot.version_label().to_string();

        let record = VersionRecord {
            hash: content_hash(&snapshot)?,
            created_at: snapshot.meta.updated_at.unwrap_or_else(Utc::now),
            version_id: version_id.clone(),
            snapshot,
        };
        store::create_new_json(&self.record_path(&version_id), &record)?;
        info!(version = %version_id, hash = %record.hash, "Archived version");

        if let Err(e) = self.cleanup().await {
            warn!("Version retention trim failed: {}", e);
        }
        Ok(record)
    }

    /// Every readable record, newest first. Corrupt records are skipped.
    pub fn history(&self) -> ConfigResult<Vec<VersionRecord>> {
        let mut ids = list_ids(&self.dir)?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_record(&id) {
                Ok(record) => records.push(record),
                Err(e) => warn!(version = %id, "Skipping unreadable version record: {}", e),
            }
        }
        Ok(records)
    }

    /// Load a record without verifying it.
    pub fn load_record(&self, version_id: &str) -> ConfigResult<VersionRecord> {
        if parse_version_id(version_id).is_none() {
            return Err(ConfigError::not_found(version_id));
        }
        let path = self.record_path(version_id);
        let record: VersionRecord =
            store::read_json(&path)?.ok_or_else(|| ConfigError::not_found(version_id))?;
        if record.version_id != version_id {
            return Err(ConfigError::parse(
                &path,
                format!("record is labelled {}", record.version_id),
            ));
        }
        Ok(record)
    }

    /// Load a record and recompute its hash.
    pub fn load_verified(&self, version_id: &str) -> ConfigResult<VersionRecord> {
        let record = self.load_record(version_id)?;
        let actual = content_hash(&record.snapshot)?;
        if actual != record.hash {
            warn!(version = %version_id, "Version record failed integrity check");
            return Err(ConfigError::Integrity {
                version_id: version_id.to_string(),
                expected: record.hash,
                actual,
            });
        }
        Ok(record)
    }

    /// Fetch a verified record and relabel it under a fresh id.
    ///
    /// The restored content is not archived here; the caller publishes it.
    pub fn rollback(&self, version_id: &str, actor: &str) -> ConfigResult<RestoredVersion> {
        let record = self.load_verified(version_id)?;
        let new_id = self.generate_version_id();
        let snapshot = record.snapshot.relabelled(&new_id, actor);
        debug!(from = %version_id, to = %new_id, "Prepared rollback");
        Ok(RestoredVersion {
            restored_from: record.version_id,
            version_id: new_id,
            hash: record.hash,
            snapshot,
        })
    }

    /// Fetch `from`, apply `transform`, validate, and relabel.
    ///
    /// `to` pins the new id; it must be ahead of every id already issued.
    pub fn migrate(
        &self,
        from: &str,
        to: Option<&str>,
        actor: &str,
        transform: Option<Transform<'_>>,
    ) -> ConfigResult<RestoredVersion> {
        let record = self.load_verified(from)?;

        let mut tree = serde_json::to_value(&record.snapshot)
            .map_err(|e| ConfigError::parse(self.record_path(from), e))?;
        if let Value::Object(map) = &mut tree {
            for key in BOOKKEEPING_KEYS {
                map.remove(*key);
            }
        }
        if let Some(transform) = transform {
            tree = transform(tree)?;
        }
        let migrated = validate_into(&tree)?;

        let new_id = match to {
            Some(id) => self.reserve_version_id(id)?,
            None => self.generate_version_id(),
        };
        let snapshot = migrated.relabelled(&new_id, actor);
        info!(from = %from, to = %new_id, "Migrated version");
        Ok(RestoredVersion {
            restored_from: record.version_id,
            version_id: new_id,
            hash: content_hash(&snapshot)?,
            snapshot,
        })
    }

    /// Trim the archive to the newest `max_versions` records.
    ///
    /// Deletions run in batches of `cleanup_concurrency`. Returns how many
    /// records were removed; zero if a trim is already running.
    pub async fn cleanup(&self) -> ConfigResult<usize> {
        let Some(_guard) = FlagGuard::try_acquire(&self.cleanup_running) else {
            debug!("Version cleanup already running, skipping");
            return Ok(0);
        };

        let mut ids = list_ids(&self.dir)?;
        if ids.len() <= self.settings.max_versions {
            return Ok(0);
        }
        ids.sort_unstable();
        let excess = ids.len() - self.settings.max_versions;
        let doomed: Vec<PathBuf> = ids[..excess].iter().map(|id| self.record_path(id)).collect();

        let mut removed = 0;
        for batch in doomed.chunks(self.settings.cleanup_concurrency.max(1)) {
            let mut set = JoinSet::new();
            for path in batch {
                let path = path.clone();
                set.spawn(async move {
                    let result = tokio::fs::remove_file(&path).await;
                    (path, result)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => removed += 1,
                    Ok((path, Err(e))) => {
                        warn!(path = %path.display(), "Failed to remove version record: {}", e)
                    }
                    Err(e) => warn!("Version cleanup task failed: {}", e),
                }
            }
        }

        info!(removed, kept = self.settings.max_versions, "Trimmed version archive");
        Ok(removed)
    }

    /// Claim a caller-chosen id, advancing the issue counter past it.
    fn reserve_version_id(&self, id: &str) -> ConfigResult<String> {
        let millis = parse_version_id(id)
            .ok_or_else(|| ConfigError::invalid("meta.version", format!("malformed version id '{}'", id)))?;
        self.last_issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (millis > last).then_some(millis)
            })
            .map_err(|last| {
                ConfigError::invalid(
                    "meta.version",
                    format!("'{}' is not ahead of {}", id, format_version_id(last)),
                )
            })?;
        Ok(id.to_string())
    }

    fn record_path(&self, version_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", version_id))
    }
}

/// SHA-256 over the canonical JSON form with bookkeeping keys removed.
///
/// Object keys serialize sorted, so equal content always hashes equal
/// regardless of the order it was built in.
pub fn content_hash(snapshot: &BotConfig) -> ConfigResult<String> {
    let mut tree = serde_json::to_value(snapshot)
        .map_err(|e| ConfigError::invalid("", format!("unserializable snapshot: {}", e)))?;
    if let Value::Object(map) = &mut tree {
        for key in BOOKKEEPING_KEYS {
            map.remove(*key);
        }
    }
    let canonical = serde_json::to_vec(&tree)
        .map_err(|e| ConfigError::invalid("", format!("unserializable snapshot: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

pub fn format_version_id(millis: u64) -> String {
    format!("v{:0width$}", millis, width = ID_DIGITS)
}

/// Millisecond component of a well-formed id.
pub fn parse_version_id(id: &str) -> Option<u64> {
    let digits = id.strip_prefix('v')?;
    if digits.len() != ID_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Ids of every record file in `dir`, unordered.
fn list_ids(dir: &Path) -> ConfigResult<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ConfigError::persistence(dir, e)),
    };
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let stem = name.strip_suffix(".json")?;
            parse_version_id(stem).map(|_| stem.to_string())
        })
        .collect())
}
