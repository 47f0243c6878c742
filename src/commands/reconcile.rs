//! Implementation of the `label-mutex reconcile` command.
//!
//! Reads the event payload, runs one reconciliation pass, and writes the
//! outputs. A malformed payload aborts before the lock store or the label API
//! is touched. Label failures are reported after the outputs are written,
//! since the lock change they follow already happened.

use crate::cli::ReconcileArgs;
use crate::config::Config;
use crate::error::{MutexError, Result};
use crate::provider::{self, LockProvider};
use crate::reconcile::{GitHubLabels, InboundEvent, LabelApi, Outcome, Reconciler, parse_event};
use std::io::Write;
use std::path::Path;

pub fn cmd_reconcile(config_path: Option<&Path>, args: ReconcileArgs) -> Result<()> {
    let config = Config::from_process_env(config_path)?;

    let payload = std::fs::read(&args.event_path).map_err(|e| {
        MutexError::UserError(format!(
            "couldn't read event '{}': {}",
            args.event_path.display(),
            e
        ))
    })?;
    let event = parse_event(&args.event_name, &payload)?;

    let labels = GitHubLabels::new(&config.github_api_url, config.require_github_token()?)?;
    let provider = provider::from_config(&config)?;
    tracing::info!(
        event = %args.event_name,
        backend = provider.provider_name(),
        lock = %config.lock_key(),
        "reconciling"
    );

    let reconciler = Reconciler::new(provider, labels, config.label.as_str());
    run(&reconciler, &event, args.output.as_deref()).map(|_| ())
}

/// One pass: reconcile, write outputs, then report label failures.
pub(crate) fn run<P, L>(
    reconciler: &Reconciler<P, L>,
    event: &InboundEvent,
    output: Option<&Path>,
) -> Result<Outcome>
where
    P: LockProvider,
    L: LabelApi,
{
    let mut reconciliation = reconciler.reconcile(event)?;
    let outcome = reconciliation.outcome.clone();
    tracing::info!(
        transition = ?reconciliation.transition,
        locked = outcome.locked,
        unlocked = outcome.unlocked,
        holder = outcome.html_url.as_deref().unwrap_or(""),
        "reconciled"
    );

    match output {
        Some(path) => outcome.append_to(path)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(outcome.to_output_lines().as_bytes())
                .map_err(|e| MutexError::UserError(format!("failed to write outputs: {}", e)))?;
        }
    }

    match reconciliation.take_label_error() {
        Some(err) => Err(err),
        None => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes;
    use crate::provider::TableLockProvider;
    use crate::store::LockKey;
    use crate::test_support::{MemoryTable, RecordingLabels};
    use std::sync::Arc;
    use tempfile::TempDir;

    const LABELED: &str = include_str!("../../testdata/pull_request.labeled.json");
    const CLOSED: &str = include_str!("../../testdata/pull_request.closed.json");
    const PR_42: &str = "https://github.com/urcomputeringpal/label-mutex/pull/42";

    fn key() -> LockKey {
        LockKey::new("label-mutex", "staging")
    }

    #[test]
    fn test_run_writes_outputs() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("github_output");
        let table = Arc::new(MemoryTable::new());
        let labels = RecordingLabels::with_labels(&["staging"]);
        let reconciler = Reconciler::new(
            TableLockProvider::new(Arc::clone(&table), key()),
            &labels,
            "staging",
        );
        let event = parse_event("pull_request", LABELED.as_bytes()).unwrap();

        let outcome = run(&reconciler, &event, Some(output.as_path())).unwrap();

        assert!(outcome.locked);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            format!("html_url={}\nlocked=true\nunlocked=false\n", PR_42)
        );
    }

    #[test]
    fn test_run_reports_label_failures_after_outputs() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("github_output");
        let table = Arc::new(MemoryTable::new());
        table.insert(&key(), PR_42);
        let labels = RecordingLabels::with_labels(&["staging", "staging:locked"]);
        labels.fail_label("staging:locked", 500);
        let reconciler = Reconciler::new(
            TableLockProvider::new(Arc::clone(&table), key()),
            &labels,
            "staging",
        );
        let event = parse_event("pull_request", CLOSED.as_bytes()).unwrap();

        let err = run(&reconciler, &event, Some(output.as_path())).unwrap_err();

        assert_eq!(err.exit_code(), exit_codes::LABEL_FAILURE);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "locked=false\nunlocked=true\n"
        );
        assert_eq!(table.value(&key()), None);
    }
}
