//! Implementation of the `label-mutex lock` subcommands.

use crate::cli::LockAction;
use crate::config::Config;
use crate::error::{MutexError, Result};
use crate::provider::{self, LockProvider};
use std::io::Write;
use std::path::Path;

pub fn cmd_lock(config_path: Option<&Path>, action: LockAction) -> Result<()> {
    let config = Config::from_process_env(config_path)?;
    let provider = provider::from_config(&config)?;
    let name = config.lock_key().to_string();

    let mut stdout = std::io::stdout().lock();
    run(provider.as_ref(), &name, &action, &mut stdout)
}

pub(crate) fn run<P, W>(provider: &P, name: &str, action: &LockAction, out: &mut W) -> Result<()>
where
    P: LockProvider + ?Sized,
    W: Write,
{
    let line = match action {
        LockAction::Acquire(args) => {
            let outcome = provider.lock(&args.token)?;
            match (outcome.obtained, outcome.holder) {
                (true, _) => format!("Lock '{}' obtained by {}", name, args.token),
                (false, Some(holder)) if holder == args.token => {
                    format!("Lock '{}' already held by {}", name, holder)
                }
                (false, Some(holder)) => format!("Lock '{}' held by {}", name, holder),
                (false, None) => {
                    return Err(MutexError::InvariantViolation(format!(
                        "lock '{}' was neither obtained nor held",
                        name
                    )));
                }
            }
        }
        LockAction::Release(args) => {
            provider.unlock(&args.token)?;
            format!("Lock '{}' released by {}", name, args.token)
        }
        LockAction::Show => match provider.read()? {
            Some(holder) => format!("Lock '{}' held by {}", name, holder),
            None => format!("Lock '{}' is free", name),
        },
    };

    writeln!(out, "{}", line)
        .map_err(|e| MutexError::UserError(format!("failed to write output: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TokenArgs;
    use crate::exit_codes;
    use crate::provider::TableLockProvider;
    use crate::store::LockKey;
    use crate::test_support::MemoryTable;

    const PR_1: &str = "https://github.com/acme/app/pull/1";
    const PR_2: &str = "https://github.com/acme/app/pull/2";

    fn acquire(token: &str) -> LockAction {
        LockAction::Acquire(TokenArgs {
            token: token.to_string(),
        })
    }

    fn release(token: &str) -> LockAction {
        LockAction::Release(TokenArgs {
            token: token.to_string(),
        })
    }

    fn exec(provider: &dyn LockProvider, action: LockAction) -> Result<String> {
        let mut out = Vec::new();
        run(provider, "ns/staging", &action, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_acquire_show_release() {
        let provider = TableLockProvider::new(MemoryTable::new(), LockKey::new("ns", "staging"));

        assert_eq!(
            exec(&provider, LockAction::Show).unwrap(),
            "Lock 'ns/staging' is free\n"
        );
        assert_eq!(
            exec(&provider, acquire(PR_1)).unwrap(),
            format!("Lock 'ns/staging' obtained by {}\n", PR_1)
        );
        assert_eq!(
            exec(&provider, acquire(PR_1)).unwrap(),
            format!("Lock 'ns/staging' already held by {}\n", PR_1)
        );
        assert_eq!(
            exec(&provider, acquire(PR_2)).unwrap(),
            format!("Lock 'ns/staging' held by {}\n", PR_1)
        );
        assert_eq!(
            exec(&provider, LockAction::Show).unwrap(),
            format!("Lock 'ns/staging' held by {}\n", PR_1)
        );
        assert_eq!(
            exec(&provider, release(PR_1)).unwrap(),
            format!("Lock 'ns/staging' released by {}\n", PR_1)
        );
    }

    #[test]
    fn test_release_by_non_holder_fails() {
        let provider = TableLockProvider::new(MemoryTable::new(), LockKey::new("ns", "staging"));
        exec(&provider, acquire(PR_1)).unwrap();

        let err = exec(&provider, release(PR_2)).unwrap_err();

        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
        assert!(err.to_string().contains(PR_1));
    }
}
