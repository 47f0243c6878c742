//! CLI argument parsing for label-mutex.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// label-mutex: apply a label to at most one pull request at a time.
///
/// The pull request carrying the label holds a named lock in a shared store
/// (DynamoDB, Google Cloud Storage, or local files). The lock is confirmed
/// with a `<label>:locked` label and released when the label is removed or
/// the pull request closes.
#[derive(Parser, Debug)]
#[command(name = "label-mutex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// YAML config file; the environment overrides its values.
    #[arg(long, global = true, env = "LABEL_MUTEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for label-mutex.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile a GitHub event with the lock.
    ///
    /// Pull request events acquire, confirm or release the lock according
    /// to the labels. Push, schedule and dispatch events report the holder.
    Reconcile(ReconcileArgs),

    /// Operate on the lock directly.
    Lock(LockCommand),
}

/// Arguments for the `reconcile` command.
#[derive(Parser, Debug)]
pub struct ReconcileArgs {
    /// Path of the event payload.
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    pub event_path: PathBuf,

    /// Name of the event (pull_request, push, ...).
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    pub event_name: String,

    /// File receiving `key=value` outputs; stdout when unset.
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub output: Option<PathBuf>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Direct lock operations.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Take the lock for a token, or confirm the token holds it.
    Acquire(TokenArgs),

    /// Release the lock held by a token.
    Release(TokenArgs),

    /// Print the current holder.
    Show,
}

/// A holder token argument.
#[derive(Parser, Debug)]
pub struct TokenArgs {
    /// Holder token, conventionally a pull request URL.
    pub token: String,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_reconcile_flags() {
        let cli = Cli::try_parse_from([
            "label-mutex",
            "reconcile",
            "--event-path",
            "/tmp/event.json",
            "--event-name",
            "pull_request",
            "--output",
            "/tmp/out",
        ])
        .unwrap();
        if let Command::Reconcile(args) = cli.command {
            assert_eq!(args.event_path, PathBuf::from("/tmp/event.json"));
            assert_eq!(args.event_name, "pull_request");
            assert_eq!(args.output, Some(PathBuf::from("/tmp/out")));
        } else {
            panic!("Expected Reconcile command");
        }
    }

    #[test]
    fn parse_global_config() {
        let cli = Cli::try_parse_from(["label-mutex", "lock", "show", "--config", "mutex.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("mutex.yaml")));
        if let Command::Lock(lock_cmd) = cli.command {
            assert!(matches!(lock_cmd.action, LockAction::Show));
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_lock_acquire() {
        let cli = Cli::try_parse_from([
            "label-mutex",
            "lock",
            "acquire",
            "https://github.com/acme/app/pull/1",
        ])
        .unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            if let LockAction::Acquire(args) = lock_cmd.action {
                assert_eq!(args.token, "https://github.com/acme/app/pull/1");
            } else {
                panic!("Expected Acquire action");
            }
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_lock_release_requires_token() {
        assert!(Cli::try_parse_from(["label-mutex", "lock", "release"]).is_err());
    }
}
