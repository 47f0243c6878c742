//! Lock providers: the `lock` / `unlock` / `read` contract on top of a store.
//!
//! A lock's value is an opaque holder token. The store is the only source of
//! truth; providers never cache what they read between calls.
//!
//! Both providers implement a confirm protocol: when the initial conditional
//! create loses because a value already exists, the provider reads the value
//! back and, if it is the caller's own token, re-asserts it with a second
//! conditional write. Repeating `lock(token)` is therefore idempotent for the
//! true holder even when the first attempt's response was lost.
//!
//! A lock held by somebody else is not an error. It comes back as a
//! [`LockOutcome`] naming the other holder.

mod object;
mod table;


pub use object::ObjectLockProvider;
pub use table::TableLockProvider;

use crate::config::{BackendKind, Config};
use crate::error::{MutexError, Result};
use crate::store::{DynamoTable, FileTable, GcsObject};
use std::time::Duration;

/// Result of a `lock` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    /// The lock was newly taken by this call.
    pub obtained: bool,
    /// Holder after the call; `None` only if the store shows no holder.
    pub holder: Option<String>,
}

impl LockOutcome {
    /// This call wrote `token` into a free lock.
    pub fn obtained(token: &str) -> Self {
        Self {
            obtained: true,
            holder: Some(token.to_string()),
        }
    }

    /// `token` already held the lock and the confirm write succeeded.
    pub fn confirmed(token: &str) -> Self {
        Self {
            obtained: false,
            holder: Some(token.to_string()),
        }
    }

    /// Somebody else holds the lock.
    pub fn held_by(holder: impl Into<String>) -> Self {
        Self {
            obtained: false,
            holder: Some(holder.into()),
        }
    }

    /// Neither obtained nor held, which a correct store never produces.
    pub fn vacant() -> Self {
        Self {
            obtained: false,
            holder: None,
        }
    }

    pub fn is_held_by(&self, token: &str) -> bool {
        self.holder.as_deref() == Some(token)
    }
}

/// A named lock whose value identifies its holder.
pub trait LockProvider {
    /// Take the lock for `token`, or confirm `token` already holds it.
    fn lock(&self, token: &str) -> Result<LockOutcome>;

    /// Release the lock held by `token`.
    ///
    /// Fails with [`MutexError::NotHolder`] and leaves the store untouched
    /// when the stored value is not `token`, including when the lock is free.
    fn unlock(&self, token: &str) -> Result<()>;

    /// Current holder; `None` when the lock is free.
    fn read(&self) -> Result<Option<String>>;

    /// Short backend name for logging.
    fn provider_name(&self) -> &'static str;
}

impl<P: LockProvider + ?Sized> LockProvider for Box<P> {
    fn lock(&self, token: &str) -> Result<LockOutcome> {
        (**self).lock(token)
    }

    fn unlock(&self, token: &str) -> Result<()> {
        (**self).unlock(token)
    }

    fn read(&self) -> Result<Option<String>> {
        (**self).read()
    }

    fn provider_name(&self) -> &'static str {
        (**self).provider_name()
    }
}

/// The empty string is the "no holder" sentinel and never a valid token.
pub(crate) fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(MutexError::UserError(
            "lock token must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Stored values of `""` mean the same as no value.
pub(crate) fn normalize_holder(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Build the provider for the configured backend.
pub fn from_config(config: &Config) -> Result<Box<dyn LockProvider>> {
    let key = config.lock_key();
    let timeout = config.timeout();

    tracing::debug!(backend = %config.backend, lock = %key, "building lock provider");

    let provider: Box<dyn LockProvider> = match config.backend {
        BackendKind::DynamoDb => Box::new(TableLockProvider::new(
            DynamoTable::connect(&config.dynamodb, timeout)?,
            key,
        )),
        BackendKind::File => Box::new(TableLockProvider::new(
            FileTable::new(&config.file.dir, timeout)
                .with_stale_guard(Duration::from_millis(config.file.stale_guard_ms)),
            key,
        )),
        BackendKind::Gcs => Box::new(ObjectLockProvider::new(
            GcsObject::new(&config.gcs, key.name)?,
            timeout,
        )),
    };
    Ok(provider)
}
