//! Config loading, environment overrides, validation, and derived values.

use super::model::Config;
use super::types::BackendKind;
use crate::error::{MutexError, Result};
use crate::store::LockKey;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    /// The result is not validated; see [`Config::resolve`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            MutexError::ConfigError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| MutexError::ConfigError(format!("failed to parse config YAML: {}", e)))
    }

    /// Serialize config to YAML string. Secrets are never serialized.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            MutexError::ConfigError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// File (if any), then environment, then validation.
    pub fn resolve<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// [`Config::resolve`] against the process environment.
    pub fn from_process_env(path: Option<&Path>) -> Result<Self> {
        Self::resolve(path, |name| std::env::var(name).ok())
    }

    /// Override fields from environment variables.
    ///
    /// Action inputs arrive as `INPUT_<NAME>`. Empty values count as unset,
    /// since the runner exports every declared input.
    pub fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(label) = get("INPUT_LABEL") {
            self.label = label;
        }
        if let Some(lock) = get("INPUT_LOCK") {
            self.lock = Some(lock);
        }
        if let Some(backend) = get("INPUT_BACKEND") {
            self.backend = BackendKind::from_str(&backend).ok_or_else(|| {
                MutexError::ConfigError(format!(
                    "input 'backend' must be one of dynamodb, gcs, file (found '{}')",
                    backend
                ))
            })?;
        }
        if let Some(timeout) = get("INPUT_TIMEOUT_MS") {
            self.timeout_ms = timeout.trim().parse().map_err(|_| {
                MutexError::ConfigError(format!(
                    "input 'timeout_ms' must be a number of milliseconds (found '{}')",
                    timeout
                ))
            })?;
        }

        if let Some(table) = get("INPUT_TABLE") {
            self.dynamodb.table = table;
        }
        if let Some(partition) = get("INPUT_PARTITION").or_else(|| get("INPUT_COLUMN")) {
            self.dynamodb.partition = partition;
        }
        if let Some(region) = get("AWS_DEFAULT_REGION") {
            self.dynamodb.region = Some(region);
        }
        if let Some(endpoint) = get("AWS_DYNAMODB_ENDPOINT_URL") {
            self.dynamodb.endpoint = Some(endpoint);
        }

        if let Some(bucket) = get("INPUT_BUCKET") {
            self.gcs.bucket = bucket;
        }
        if let Some(endpoint) = get("GCS_ENDPOINT_URL") {
            self.gcs.endpoint = Some(endpoint);
        }
        if let Some(skip) = get("GCS_INSECURE_SKIP_VERIFY") {
            self.gcs.insecure_skip_verify = skip.trim() == "true";
        }
        if let Some(token) = get("GCS_ACCESS_TOKEN") {
            self.gcs.access_token = Some(token);
        }

        if let Some(dir) = get("INPUT_LOCK_DIR") {
            self.file.dir = PathBuf::from(dir);
        }

        if let Some(url) = get("GITHUB_API_URL") {
            self.github_api_url = url;
        }
        if let Some(token) = get("INPUT_GITHUB_TOKEN").or_else(|| get("GITHUB_TOKEN")) {
            self.github_token = Some(token);
        }

        Ok(())
    }

    /// Validate config values, reporting every problem at once.
    ///
    /// Validation rules:
    /// - `label` must be set
    /// - `lock`, when set, must be non-empty
    /// - `timeout_ms` must be positive
    /// - the selected backend's required settings must be present
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.label.trim().is_empty() {
            problems.push("input 'label' missing".to_string());
        }
        if self.lock.as_deref().is_some_and(|l| l.trim().is_empty()) {
            problems.push("input 'lock' must not be empty when set".to_string());
        }
        if self.timeout_ms == 0 {
            problems.push("timeout_ms must be greater than 0".to_string());
        }

        match self.backend {
            BackendKind::DynamoDb => {
                if self.dynamodb.table.trim().is_empty() {
                    problems.push("input 'table' missing".to_string());
                }
                if self.dynamodb.partition.trim().is_empty() {
                    problems.push("input 'partition' missing".to_string());
                }
            }
            BackendKind::Gcs => {
                if self.gcs.bucket.trim().is_empty() {
                    problems.push("input 'bucket' missing".to_string());
                }
            }
            BackendKind::File => {
                if self.file.dir.as_os_str().is_empty() {
                    problems.push("file.dir must not be empty".to_string());
                }
                if self.file.namespace.trim().is_empty() {
                    problems.push("file.namespace must not be empty".to_string());
                }
                if self.file.stale_guard_ms == 0 {
                    problems.push("file.stale_guard_ms must be greater than 0".to_string());
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MutexError::ConfigError(problems.join("; ")))
        }
    }

    /// The lock's name: `lock` if set, else the label.
    pub fn lock_name(&self) -> &str {
        self.lock.as_deref().unwrap_or(&self.label)
    }

    /// Where the lock lives in the selected backend.
    pub fn lock_key(&self) -> LockKey {
        let namespace = match self.backend {
            BackendKind::DynamoDb => &self.dynamodb.partition,
            BackendKind::Gcs => &self.gcs.bucket,
            BackendKind::File => &self.file.namespace,
        };
        LockKey::new(namespace.as_str(), self.lock_name())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The label API token, required by commands that touch labels.
    pub fn require_github_token(&self) -> Result<&str> {
        self.github_token.as_deref().ok_or_else(|| {
            MutexError::ConfigError("input 'GITHUB_TOKEN' missing".to_string())
        })
    }
}
