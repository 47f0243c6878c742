//! Configuration model for label-mutex.
//!
//! This module defines the Config struct, read from an optional YAML file and
//! the GitHub Actions environment. It supports forward-compatible YAML parsing
//! (unknown fields are ignored), defaults for optional fields, and validation
//! that reports every problem at once.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::Config;
pub use types::{BackendKind, DynamoConfig, FileConfig, GcsConfig};
