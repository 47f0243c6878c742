//! Reconciliation outputs.

use crate::error::{MutexError, Result};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// What a pass reports about the lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub locked: bool,
    pub unlocked: bool,
    /// Current holder, when known.
    pub html_url: Option<String>,
}

impl Outcome {
    pub fn locked_by(holder: impl Into<String>) -> Self {
        Self {
            locked: true,
            unlocked: false,
            html_url: Some(holder.into()),
        }
    }

    pub fn released() -> Self {
        Self {
            locked: false,
            unlocked: true,
            html_url: None,
        }
    }

    /// Output name to value; `html_url` only when a holder is known.
    pub fn outputs(&self) -> BTreeMap<&'static str, String> {
        let mut outputs = BTreeMap::new();
        outputs.insert("locked", self.locked.to_string());
        outputs.insert("unlocked", self.unlocked.to_string());
        if let Some(url) = self.html_url.as_deref().filter(|u| !u.is_empty()) {
            outputs.insert("html_url", url.to_string());
        }
        outputs
    }

    /// `key=value` lines in the format of `$GITHUB_OUTPUT`.
    pub fn to_output_lines(&self) -> String {
        self.outputs()
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }

    /// Append the outputs to the file at `path`.
    pub fn append_to(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                MutexError::UserError(format!(
                    "failed to open output file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        file.write_all(self.to_output_lines().as_bytes())
            .map_err(|e| {
                MutexError::UserError(format!(
                    "failed to write output file '{}': {}",
                    path.display(),
                    e
                ))
            })
    }
}
