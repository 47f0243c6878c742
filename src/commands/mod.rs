//! Command implementations for label-mutex.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod lock;
mod reconcile;

use crate::cli::{Cli, Command};
use crate::error::Result;

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Reconcile(args) => reconcile::cmd_reconcile(config_path, args),
        Command::Lock(lock_cmd) => lock::cmd_lock(config_path, lock_cmd.action),
    }
}
