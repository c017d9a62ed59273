//! Size-rotated log files and age-based retention for the gateway's file log.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

const DEFAULT_LOG_ROTATION_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_LOG_ROTATION_MAX_FILES: usize = 2;

/// Size-based rotation settings for [`RotatingLogWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_LOG_ROTATION_MAX_BYTES,
            max_files: DEFAULT_LOG_ROTATION_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Reads `MIAU_LOG_ROTATION_MAX_BYTES` / `MIAU_LOG_ROTATION_MAX_FILES`,
    /// keeping defaults for missing or non-positive values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: positive_env("MIAU_LOG_ROTATION_MAX_BYTES").unwrap_or(defaults.max_bytes),
            max_files: positive_env("MIAU_LOG_ROTATION_MAX_FILES")
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.max_files),
        }
    }

    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

fn positive_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

/// `io::Write` sink appending to one file and rotating it to `<path>.1..N`
/// once the next write would cross `max_bytes`.
///
/// Clones share one lock, so each formatted log line lands whole.
#[derive(Debug, Clone)]
pub struct RotatingLogWriter {
    path: PathBuf,
    policy: LogRotationPolicy,
    lock: Arc<Mutex<()>>,
}

impl RotatingLogWriter {
    pub fn new(path: impl Into<PathBuf>, policy: LogRotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        append_with_rotation(&self.path, buf, self.policy)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn append_with_rotation(path: &Path, bytes: &[u8], policy: LogRotationPolicy) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    if policy.is_enabled() {
        if let Ok(metadata) = std::fs::metadata(path) {
            let incoming = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            if metadata.len() > 0 && metadata.len().saturating_add(incoming) > policy.max_bytes {
                rotate_log_file(path, policy)?;
            }
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.flush()
}

fn rotated_backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{index}", path.display()))
}

fn rotate_log_file(path: &Path, policy: LogRotationPolicy) -> std::io::Result<()> {
    if policy.max_files <= 1 {
        return std::fs::remove_file(path);
    }

    let oldest = policy.max_files - 1;
    let oldest_path = rotated_backup_path(path, oldest);
    if oldest_path.exists() {
        std::fs::remove_file(&oldest_path)?;
    }
    for index in (1..oldest).rev() {
        let source = rotated_backup_path(path, index);
        if source.exists() {
            std::fs::rename(&source, rotated_backup_path(path, index + 1))?;
        }
    }
    std::fs::rename(path, rotated_backup_path(path, 1))
}

/// Deletes regular `*.log*` files in `dir` whose modification time is older
/// than `max_age`. Returns how many files were removed.
pub fn prune_stale_logs(dir: &Path, max_age: Duration) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read {}", dir.display()))
        }
    };
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let name = entry.file_name();
        if !name.to_string_lossy().contains(".log") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let stale = metadata
            .modified()
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if stale {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(error) => tracing::warn!(
                    path = %entry.path().display(),
                    %error,
                    "failed to remove stale log file"
                ),
            }
        }
    }
    Ok(removed)
}
