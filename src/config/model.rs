//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for one label-mutex run.
///
/// Read from an optional YAML file, then overridden from the environment.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Label that requests the lock (required).
    pub label: String,

    /// Lock name; defaults to the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,

    /// Which store holds the lock.
    #[serde(default)]
    pub backend: BackendKind,

    /// Deadline for each store call, retries included.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    // =========================================================================
    // Backend settings
    // =========================================================================
    #[serde(default)]
    pub dynamodb: DynamoConfig,

    #[serde(default)]
    pub gcs: GcsConfig,

    #[serde(default)]
    pub file: FileConfig,

    // =========================================================================
    // GitHub settings
    // =========================================================================
    /// REST API base URL.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Token for the label API. Only ever read from the environment.
    #[serde(skip)]
    pub github_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            label: String::new(),
            lock: None,
            backend: BackendKind::default(),
            timeout_ms: default_timeout_ms(),
            dynamodb: DynamoConfig::default(),
            gcs: GcsConfig::default(),
            file: FileConfig::default(),
            github_api_url: default_github_api_url(),
            github_token: None,
        }
    }
}
