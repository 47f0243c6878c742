//! Local-filesystem table store.
//!
//! Each `(namespace, name)` lives at `{root}/{namespace}/{name}.lock` and
//! holds the raw token. Conditional writes take a per-key write guard, check
//! the precondition against the current file, then replace the value
//! atomically. Reads never take the guard.
//!
//! Only processes sharing the filesystem are serialised, so this store suits
//! a single host (self-hosted runners, local runs, tests).

mod guard;


use super::{CasOutcome, LockKey, PutCondition, TableStore};
use crate::error::{MutexError, Result};
use crate::fs::atomic_write_file;
use crate::retry::Deadline;
use guard::acquire_guard;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Guards older than this are treated as left behind by a dead writer.
pub const DEFAULT_STALE_GUARD: Duration = Duration::from_secs(30);

/// Table store backed by files under a root directory.
#[derive(Debug, Clone)]
pub struct FileTable {
    root: PathBuf,
    timeout: Duration,
    stale_guard: Duration,
}

impl FileTable {
    /// `timeout` bounds how long a write waits for another writer's guard.
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            stale_guard: DEFAULT_STALE_GUARD,
        }
    }

    /// Age after which another writer's guard is removed instead of waited on.
    pub fn with_stale_guard(mut self, stale_guard: Duration) -> Self {
        self.stale_guard = stale_guard;
        self
    }

    fn value_path(&self, key: &LockKey) -> Result<PathBuf> {
        validate_component("namespace", &key.namespace)?;
        validate_component("name", &key.name)?;
        Ok(self
            .root
            .join(&key.namespace)
            .join(format!("{}.lock", key.name)))
    }

    fn guard_path(value_path: &Path) -> PathBuf {
        let mut name = value_path.as_os_str().to_owned();
        name.push(".guard");
        PathBuf::from(name)
    }
}

fn validate_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
    {
        return Err(MutexError::ConfigError(format!(
            "lock {} '{}' is not usable as a file name",
            field, value
        )));
    }
    Ok(())
}

fn read_value(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MutexError::BackendError(format!(
            "failed to read lock file '{}': {}",
            path.display(),
            e
        ))),
    }
}

impl TableStore for FileTable {
    fn conditional_put(
        &self,
        key: &LockKey,
        value: &str,
        condition: &PutCondition,
    ) -> Result<CasOutcome> {
        let path = self.value_path(key)?;
        let _guard = acquire_guard(
            &Self::guard_path(&path),
            "put",
            Deadline::after(self.timeout),
            self.stale_guard,
        )?;

        let current = read_value(&path)?;
        let holds = match condition {
            PutCondition::IfAbsent => current.is_none(),
            PutCondition::IfMatches(previous) => current.as_deref() == Some(previous.as_str()),
        };
        if !holds {
            return Ok(CasOutcome::Rejected);
        }

        atomic_write_file(&path, value)?;
        Ok(CasOutcome::Applied)
    }

    fn conditional_delete(&self, key: &LockKey, expected: &str) -> Result<CasOutcome> {
        let path = self.value_path(key)?;
        let _guard = acquire_guard(
            &Self::guard_path(&path),
            "delete",
            Deadline::after(self.timeout),
            self.stale_guard,
        )?;

        if read_value(&path)?.as_deref() != Some(expected) {
            return Ok(CasOutcome::Rejected);
        }

        fs::remove_file(&path).map_err(|e| {
            MutexError::BackendError(format!(
                "failed to remove lock file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(CasOutcome::Applied)
    }

    fn get(&self, key: &LockKey) -> Result<Option<String>> {
        read_value(&self.value_path(key)?)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
