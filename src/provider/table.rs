//! Lock provider over a [`TableStore`].

use super::{LockOutcome, LockProvider, normalize_holder, validate_token};
use crate::error::{MutexError, Result};
use crate::store::{CasOutcome, LockKey, PutCondition, TableStore};

/// Lock stored as one row of a table store.
#[derive(Debug)]
pub struct TableLockProvider<S> {
    store: S,
    key: LockKey,
}

impl<S: TableStore> TableLockProvider<S> {
    pub fn new(store: S, key: LockKey) -> Self {
        Self { store, key }
    }

    /// Re-assert `token` over the value `previous` read back after losing
    /// the create.
    fn put_over(&self, token: &str, previous: &str) -> Result<CasOutcome> {
        self.store.conditional_put(
            &self.key,
            token,
            &PutCondition::IfMatches(previous.to_string()),
        )
    }
}

impl<S: TableStore> LockProvider for TableLockProvider<S> {
    fn lock(&self, token: &str) -> Result<LockOutcome> {
        validate_token(token)?;
        tracing::info!(lock = %self.key, token, "attempting to lock");

        if self
            .store
            .conditional_put(&self.key, token, &PutCondition::IfAbsent)?
            == CasOutcome::Applied
        {
            tracing::info!(lock = %self.key, token, "lock obtained");
            return Ok(LockOutcome::obtained(token));
        }

        tracing::info!(lock = %self.key, "lock exists, reading current value");
        let current = self.store.get(&self.key).inspect_err(|e| {
            tracing::warn!(lock = %self.key, error = %e, "failed to read lock after losing create");
        })?;

        match current.as_deref() {
            Some(holder) if holder == token => match self.put_over(token, holder)? {
                CasOutcome::Applied => {
                    tracing::info!(lock = %self.key, token, "lock confirmed");
                    Ok(LockOutcome::confirmed(token))
                }
                CasOutcome::Rejected => {
                    tracing::warn!(lock = %self.key, token, "lock changed while confirming");
                    Err(MutexError::ConfirmFailed {
                        token: token.to_string(),
                    })
                }
            },
            // A row with an empty value is a free lock.
            Some("") => match self.put_over(token, "")? {
                CasOutcome::Applied => {
                    tracing::info!(lock = %self.key, token, "lock obtained over empty value");
                    Ok(LockOutcome::obtained(token))
                }
                CasOutcome::Rejected => {
                    let holder = normalize_holder(self.store.get(&self.key)?);
                    Ok(holder.map_or_else(LockOutcome::vacant, LockOutcome::held_by))
                }
            },
            Some(holder) => {
                tracing::info!(lock = %self.key, holder, "lock held by another token");
                Ok(LockOutcome::held_by(holder))
            }
            // Deleted between the failed create and the read.
            None => Ok(LockOutcome::vacant()),
        }
    }

    fn unlock(&self, token: &str) -> Result<()> {
        validate_token(token)?;
        tracing::info!(lock = %self.key, token, "attempting to unlock");

        let current = normalize_holder(self.store.get(&self.key)?);
        if current.as_deref() != Some(token) {
            return Err(MutexError::NotHolder {
                token: token.to_string(),
                holder: current,
            });
        }

        match self.store.conditional_delete(&self.key, token)? {
            CasOutcome::Applied => {
                tracing::info!(lock = %self.key, token, "lock released");
                Ok(())
            }
            CasOutcome::Rejected => Err(MutexError::NotHolder {
                token: token.to_string(),
                holder: normalize_holder(self.store.get(&self.key)?),
            }),
        }
    }

    fn read(&self) -> Result<Option<String>> {
        Ok(normalize_holder(self.store.get(&self.key)?))
    }

    fn provider_name(&self) -> &'static str {
        self.store.backend_name()
    }
}
