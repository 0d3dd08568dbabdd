//! Durable record storage.
//!
//! Every record is written atomically: staged to a temporary file in the
//! destination directory, flushed, then renamed over the target. A crash
//! mid-write leaves the previous record intact.

use crate::error::{ConfigError, ConfigResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> ConfigResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| ConfigError::persistence(dir, e))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(|e| ConfigError::persistence(path, e))?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| ConfigError::persistence(path, e))?;
    staged
        .persist(path)
        .map_err(|e| ConfigError::persistence(path, e.error))?;
    Ok(())
}

/// Atomically write a value as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| ConfigError::parse(path, e))?;
    write_atomic(path, &json)
}

/// Atomically write a value as YAML.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
    let yaml = serde_yaml::to_string(value).map_err(|e| ConfigError::parse(path, e))?;
    write_atomic(path, yaml.as_bytes())
}

/// Read a JSON record. `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ConfigResult<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::persistence(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ConfigError::parse(path, e))
}

/// Create `path` exclusively; fails if it already exists.
pub fn create_new_json<T: Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| ConfigError::parse(path, e))?;
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| ConfigError::persistence(dir, e))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(|e| ConfigError::persistence(path, e))?;
    staged
        .write_all(&json)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| ConfigError::persistence(path, e))?;
    // persist_noclobber refuses to replace an existing file.
    staged
        .persist_noclobber(path)
        .map_err(|e| ConfigError::persistence(path, e.error))?;
    Ok(())
}

/// Append one line to a log file, creating it if needed. Not atomic; used
/// only as a last-resort fallback path.
pub fn append_line(path: &Path, line: &str) -> ConfigResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::persistence(dir, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ConfigError::persistence(path, e))?;
    writeln!(file, "{}", line).map_err(|e| ConfigError::persistence(path, e))
}
