//! Configuration types and defaults for label-mutex.
//!
//! This module defines the backend enum, the per-backend sections and the
//! default value functions used by the Config struct.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which store holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// DynamoDB table with conditional writes (default).
    #[default]
    #[serde(rename = "dynamodb")]
    DynamoDb,
    /// Google Cloud Storage object with generation preconditions.
    Gcs,
    /// Files on the local filesystem.
    File,
}

impl BackendKind {
    /// Parse a backend name from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamodb" | "dynamo" => Some(Self::DynamoDb),
            "gcs" => Some(Self::Gcs),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DynamoDb => "dynamodb",
            Self::Gcs => "gcs",
            Self::File => "file",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DynamoDB table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    /// Table name.
    pub table: String,

    /// Partition key value the lock rows live under.
    #[serde(default = "default_partition")]
    pub partition: String,

    /// AWS region; the SDK's default chain applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Endpoint override, e.g. DynamoDB Local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            partition: default_partition(),
            region: None,
            endpoint: None,
        }
    }
}

/// Google Cloud Storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    /// Bucket holding the lock objects.
    pub bucket: String,

    /// Host replacing `https://storage.googleapis.com`, e.g. an emulator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Accept invalid TLS certificates from the endpoint.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// OAuth2 bearer token. Only ever read from the environment.
    #[serde(skip)]
    pub access_token: Option<String>,
}

/// Local file store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Root directory of the lock files.
    #[serde(default = "default_file_dir")]
    pub dir: PathBuf,

    /// Subdirectory the lock files live in.
    #[serde(default = "default_partition")]
    pub namespace: String,

    /// Age after which a write guard counts as abandoned and is removed.
    #[serde(default = "default_stale_guard_ms")]
    pub stale_guard_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            dir: default_file_dir(),
            namespace: default_partition(),
            stale_guard_ms: default_stale_guard_ms(),
        }
    }
}

// Default value functions for serde
pub(crate) fn default_partition() -> String {
    "label-mutex".to_string()
}
pub(crate) fn default_file_dir() -> PathBuf {
    PathBuf::from(".label-mutex")
}
pub(crate) fn default_stale_guard_ms() -> u64 {
    30_000
}
pub(crate) fn default_timeout_ms() -> u64 {
    5000
}
pub(crate) fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
