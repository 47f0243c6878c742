//! Lock provider over an [`ObjectStore`].
//!
//! The object is read before creating it, so a lock that is already held is
//! reported straight away instead of after a full deadline of failed
//! preconditions. The create itself is conditional on the generation seen by
//! that read, and losing it is resolved by reading again.

use super::{LockOutcome, LockProvider, normalize_holder, validate_token};
use crate::error::{MutexError, Result};
use crate::retry::Deadline;
use crate::store::{GENERATION_ABSENT, ObjectStore, StoredObject};
use std::time::Duration;

/// Lock stored as a single object.
#[derive(Debug)]
pub struct ObjectLockProvider<S> {
    store: S,
    timeout: Duration,
}

impl<S: ObjectStore> ObjectLockProvider<S> {
    /// `timeout` bounds each store call, retries included.
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout)
    }

    fn read_object(&self) -> Result<Option<StoredObject>> {
        self.store.read(&self.deadline())
    }

    /// Rewrite our own token at the generation we read it from.
    ///
    /// A create that runs into its deadline is ambiguous: the precondition
    /// may have failed, or the store may be unreachable. Reading again tells
    /// the two apart.
    fn confirm(&self, token: &str, generation: i64) -> Result<LockOutcome> {
        tracing::info!(object = self.store.backend_name(), token, generation, "confirming lock");
        let create_err = match self.store.create(token, generation, &self.deadline()) {
            Ok(()) => {
                tracing::info!(token, "lock confirmed");
                return Ok(LockOutcome::confirmed(token));
            }
            Err(e @ MutexError::DeadlineExceeded { .. }) => e,
            Err(e) => return Err(e),
        };

        match self.read_object() {
            Ok(Some(object)) if object.value == token && object.generation == generation => {
                tracing::warn!(token, error = %create_err, "lock unchanged but confirm write never landed");
                Err(create_err)
            }
            Ok(Some(object)) if !object.value.is_empty() && object.value != token => {
                tracing::info!(holder = %object.value, "lock taken by another token while confirming");
                Ok(LockOutcome::held_by(object.value))
            }
            Ok(_) => {
                tracing::warn!(token, "lock changed while confirming");
                Err(MutexError::ConfirmFailed {
                    token: token.to_string(),
                })
            }
            Err(read_err) => {
                tracing::warn!(error = %read_err, "failed to read lock after confirm write");
                Err(create_err)
            }
        }
    }
}

impl<S: ObjectStore> LockProvider for ObjectLockProvider<S> {
    fn lock(&self, token: &str) -> Result<LockOutcome> {
        validate_token(token)?;

        tracing::info!(token, "reading current lock value");
        let generation = match self.read_object()? {
            Some(object) if object.value == token => {
                return self.confirm(token, object.generation);
            }
            Some(object) if !object.value.is_empty() => {
                tracing::info!(holder = %object.value, "lock held by another token");
                return Ok(LockOutcome::held_by(object.value));
            }
            // An empty object is a free lock; replace it at its generation.
            Some(object) => object.generation,
            None => GENERATION_ABSENT,
        };

        tracing::info!(token, generation, "attempting to lock");
        let create_err = match self.store.create(token, generation, &self.deadline()) {
            Ok(()) => {
                tracing::info!(token, "lock obtained");
                return Ok(LockOutcome::obtained(token));
            }
            Err(e @ MutexError::DeadlineExceeded { .. }) => e,
            Err(e) => return Err(e),
        };

        tracing::info!(error = %create_err, "couldn't obtain lock outright, reading current value");
        match self.read_object() {
            Ok(Some(object)) if object.value == token => self.confirm(token, object.generation),
            Ok(Some(object)) if !object.value.is_empty() => {
                tracing::info!(holder = %object.value, "lock taken by another token");
                Ok(LockOutcome::held_by(object.value))
            }
            Ok(_) => Err(create_err),
            Err(read_err) => {
                tracing::warn!(error = %read_err, "failed to read lock after losing create");
                Err(read_err)
            }
        }
    }

    fn unlock(&self, token: &str) -> Result<()> {
        validate_token(token)?;
        tracing::info!(token, "attempting to unlock");

        let current = normalize_holder(self.read_object()?.map(|o| o.value));
        if current.as_deref() != Some(token) {
            return Err(MutexError::NotHolder {
                token: token.to_string(),
                holder: current,
            });
        }

        tracing::info!(token, "holder confirmed, deleting lock object");
        self.store.delete(&self.deadline())
    }

    fn read(&self) -> Result<Option<String>> {
        Ok(normalize_holder(self.read_object()?.map(|o| o.value)))
    }

    fn provider_name(&self) -> &'static str {
        self.store.backend_name()
    }
}
