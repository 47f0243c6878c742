//! Backend adapters for the lock store.
//!
//! Two kinds of store are supported, each behind its own capability trait:
//!
//! - [`TableStore`]: a keyed table with conditional put and conditional
//!   delete (DynamoDB, or the local [`FileTable`]). A single conditional call
//!   either applies or is rejected; there is no retry layer here.
//! - [`ObjectStore`]: a single object addressed by bucket and name, with
//!   create-if-generation-matches and unconditional delete (Google Cloud
//!   Storage). Every call retries transient failures until its deadline.
//!
//! Lock providers in `crate::provider` add the confirm protocol on top.

pub mod dynamo;
pub mod file;
pub mod gcs;

pub use dynamo::DynamoTable;
pub use file::FileTable;
pub use gcs::{GcsEndpoints, GcsObject};

use crate::error::Result;
use crate::retry::Deadline;
use std::sync::Arc;

/// Address of a lock inside a table store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Partition the lock lives in (table partition, directory).
    pub namespace: String,
    /// Lock name within the namespace.
    pub name: String,
}

impl LockKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Precondition for a conditional put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutCondition {
    /// The key must have no entry at all.
    IfAbsent,
    /// The key's current value must equal this one.
    IfMatches(String),
}

/// Whether a conditional write took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The precondition did not hold; the store was not modified.
    Rejected,
}

/// A table store offering conditional put/delete and plain reads.
pub trait TableStore: Send + Sync {
    /// Write `value` under `key` if `condition` holds.
    fn conditional_put(
        &self,
        key: &LockKey,
        value: &str,
        condition: &PutCondition,
    ) -> Result<CasOutcome>;

    /// Delete `key` if its current value equals `expected`.
    fn conditional_delete(&self, key: &LockKey, expected: &str) -> Result<CasOutcome>;

    /// Read the value under `key`; `None` when there is no entry.
    fn get(&self, key: &LockKey) -> Result<Option<String>>;

    /// Short backend name for logging.
    fn backend_name(&self) -> &'static str;
}

impl<S: TableStore + ?Sized> TableStore for Arc<S> {
    fn conditional_put(
        &self,
        key: &LockKey,
        value: &str,
        condition: &PutCondition,
    ) -> Result<CasOutcome> {
        (**self).conditional_put(key, value, condition)
    }

    fn conditional_delete(&self, key: &LockKey, expected: &str) -> Result<CasOutcome> {
        (**self).conditional_delete(key, expected)
    }

    fn get(&self, key: &LockKey) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

/// Object content together with its generation number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub value: String,
    pub generation: i64,
}

/// Generation precondition meaning "the object must not exist".
pub const GENERATION_ABSENT: i64 = 0;

/// A single object in an object store.
pub trait ObjectStore: Send + Sync {
    /// Create the object with `value` if its generation equals
    /// `if_generation_match` ([`GENERATION_ABSENT`] for create-if-absent).
    fn create(&self, value: &str, if_generation_match: i64, deadline: &Deadline) -> Result<()>;

    /// Delete the object unconditionally.
    fn delete(&self, deadline: &Deadline) -> Result<()>;

    /// Read the object; `None` when it does not exist.
    fn read(&self, deadline: &Deadline) -> Result<Option<StoredObject>>;

    /// Short backend name for logging.
    fn backend_name(&self) -> &'static str;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn create(&self, value: &str, if_generation_match: i64, deadline: &Deadline) -> Result<()> {
        (**self).create(value, if_generation_match, deadline)
    }

    fn delete(&self, deadline: &Deadline) -> Result<()> {
        (**self).delete(deadline)
    }

    fn read(&self, deadline: &Deadline) -> Result<Option<StoredObject>> {
        (**self).read(deadline)
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}
