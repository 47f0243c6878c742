//! Write guards serialising mutations of one lock file.
//!
//! A guard is a sibling `*.guard` file created with `create_new` semantics,
//! so only one process at a time can run a compare-and-swap on the value
//! file. The guard carries JSON metadata naming its owner, which shows up in
//! the error when a guard cannot be obtained before the deadline.
//!
//! A writer killed mid-CAS leaves its guard behind. Once a guard is older than
//! the stale threshold it is removed and the exclusive create is retried.

use crate::error::{MutexError, Result};
use crate::retry::{Attempt, Backoff, Deadline, retry_until_deadline};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

/// Metadata stored in a guard file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardMetadata {
    /// Owner of the guard (e.g., `user@HOST`).
    pub owner: String,

    /// Process ID of the guard holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// When the guard was taken (RFC3339).
    pub created_at: DateTime<Utc>,

    /// The store operation in progress (put/delete).
    pub operation: String,
}

impl GuardMetadata {
    pub fn new(operation: &str) -> Self {
        Self {
            owner: owner_string(),
            pid: Some(std::process::id()),
            created_at: Utc::now(),
            operation: operation.to_string(),
        }
    }

    fn from_file(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            MutexError::BackendError(format!("failed to serialize guard metadata: {}", e))
        })
    }

    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Older than `threshold`. A timestamp in the future is never stale.
    pub fn is_stale(&self, threshold: StdDuration) -> bool {
        self.age().to_std().is_ok_and(|age| age > threshold)
    }
}

/// Age of a guard whose metadata cannot be parsed, e.g. because its writer
/// died between creating and filling it.
fn file_age(path: &Path) -> Option<StdDuration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Remove the guard at `path` if it is older than `stale_after`.
///
/// Returns whether a stale guard was removed.
fn clear_stale_guard(path: &Path, stale_after: StdDuration) -> Result<bool> {
    let stale = match GuardMetadata::from_file(path) {
        Some(meta) if meta.is_stale(stale_after) => {
            tracing::warn!(
                path = %path.display(),
                owner = %meta.owner,
                operation = %meta.operation,
                age_secs = meta.age().num_seconds(),
                "removing stale write guard"
            );
            true
        }
        Some(_) => false,
        None => match file_age(path) {
            Some(age) if age > stale_after => {
                tracing::warn!(path = %path.display(), ?age, "removing unreadable stale write guard");
                true
            }
            _ => false,
        },
    };
    if !stale {
        return Ok(false);
    }

    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        // Another writer cleared it first.
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(MutexError::BackendError(format!(
            "failed to remove stale write guard '{}': {}",
            path.display(),
            e
        ))),
    }
}

/// `user@HOST` of the current process.
fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// RAII guard; the guard file is removed on drop.
#[derive(Debug)]
pub struct WriteGuard {
    path: PathBuf,
}

impl WriteGuard {
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release write guard");
        }
    }
}

/// Take the guard at `guard_path`, waiting for other holders until `deadline`.
///
/// A guard older than `stale_after` is removed and the create retried.
pub fn acquire_guard(
    guard_path: &Path,
    operation: &str,
    deadline: Deadline,
    stale_after: StdDuration,
) -> Result<WriteGuard> {
    if let Some(parent) = guard_path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            MutexError::BackendError(format!(
                "failed to create lock directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let metadata = GuardMetadata::new(operation);
    let json = metadata.to_json()?;

    retry_until_deadline(deadline, Backoff::default(), |_| {
        match try_create(guard_path, &json) {
            Ok(guard) => Attempt::Done(guard),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match clear_stale_guard(guard_path, stale_after) {
                    Ok(true) => {
                        return Attempt::Retry(format!(
                            "removed stale write guard '{}'",
                            guard_path.display()
                        ));
                    }
                    Ok(false) => {}
                    Err(e) => return Attempt::Fail(e),
                }
                let holder = match GuardMetadata::from_file(guard_path) {
                    Some(meta) => format!(
                        "write guard '{}' held by {} ({}) for {}s",
                        guard_path.display(),
                        meta.owner,
                        meta.operation,
                        meta.age().num_seconds()
                    ),
                    None => format!("write guard '{}' is held", guard_path.display()),
                };
                Attempt::Retry(holder)
            }
            Err(e) => Attempt::Fail(MutexError::BackendError(format!(
                "failed to create write guard '{}': {}",
                guard_path.display(),
                e
            ))),
        }
    })
}

fn try_create(path: &Path, json: &str) -> std::io::Result<WriteGuard> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    // From here on the guard exists; make sure it is removed on failure.
    let guard = WriteGuard {
        path: path.to_path_buf(),
    };
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(guard)
}
