//! Reconciliation of claim labels with the lock.
//!
//! A pull request claims the lock by carrying the request label (`{label}`).
//! Once the lock is held, the reconciler adds the confirmed label
//! (`{label}:locked`). Closing the pull request or removing the request label
//! releases the lock and both labels.
//!
//! Every pass starts from the event and a fresh provider call. Nothing is
//! remembered between passes: the lock store and the label set are the only
//! persisted state.
//!
//! # Transitions
//!
//! | Event                                    | Action  |
//! |------------------------------------------|---------|
//! | subject closed, or request label removed | release |
//! | request + confirmed labels               | confirm |
//! | request label only                       | acquire |
//! | no request label                         | nothing |
//! | probe (push, schedule, ...)              | read    |

mod event;
mod labels;
mod outcome;


pub use event::{CLAIM_EVENTS, ClaimEvent, InboundEvent, PROBE_EVENTS, parse_event};
pub use labels::{GitHubLabels, LabelApi, Subject};
pub use outcome::Outcome;

use crate::error::{MutexError, Result};
use crate::provider::{LockOutcome, LockProvider};

/// Suffix of the label marking a confirmed claim.
pub const LOCKED_SUFFIX: &str = "locked";

/// Claim state as carried by the subject's labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No request label.
    Unlocked,
    /// Request label without the confirmed label.
    LockRequested,
    /// Both labels.
    LockConfirmed,
}

/// What a pass does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Release,
    Confirm,
    Acquire,
    Noop,
    Probe,
}

/// Result of one pass.
///
/// Label failures do not undo the lock change that preceded them, so they
/// are returned next to the outcome instead of replacing it.
#[derive(Debug)]
pub struct Reconciliation {
    pub transition: Transition,
    pub outcome: Outcome,
    pub label_failures: Vec<MutexError>,
}

impl Reconciliation {
    fn new(transition: Transition, outcome: Outcome) -> Self {
        Self {
            transition,
            outcome,
            label_failures: Vec::new(),
        }
    }

    /// Take the collected label failures as one error, if there were any.
    pub fn take_label_error(&mut self) -> Option<MutexError> {
        if self.label_failures.is_empty() {
            return None;
        }
        Some(MutexError::LabelFailures(std::mem::take(
            &mut self.label_failures,
        )))
    }
}

/// Drives one lock from claim label events.
pub struct Reconciler<P, L> {
    provider: P,
    labels: L,
    label: String,
}

impl<P: LockProvider, L: LabelApi> Reconciler<P, L> {
    pub fn new(provider: P, labels: L, label: impl Into<String>) -> Self {
        Self {
            provider,
            labels,
            label: label.into(),
        }
    }

    /// `{label}:locked`
    pub fn confirmed_label(&self) -> String {
        format!("{}:{}", self.label, LOCKED_SUFFIX)
    }

    pub fn claim_state(&self, claim: &ClaimEvent) -> ClaimState {
        match (
            claim.has_label(&self.label),
            claim.has_label(&self.confirmed_label()),
        ) {
            (true, true) => ClaimState::LockConfirmed,
            (true, false) => ClaimState::LockRequested,
            (false, _) => ClaimState::Unlocked,
        }
    }

    /// Decide what a claim event asks for.
    pub fn plan(&self, claim: &ClaimEvent) -> Transition {
        let request_removed = claim.removed_label.as_deref() == Some(self.label.as_str());
        if !claim.subject_open || request_removed {
            return Transition::Release;
        }
        match self.claim_state(claim) {
            ClaimState::LockConfirmed => Transition::Confirm,
            ClaimState::LockRequested => Transition::Acquire,
            ClaimState::Unlocked => Transition::Noop,
        }
    }

    /// Run one pass over `event`.
    ///
    /// Lock errors abort the pass. Label errors are collected in the result.
    pub fn reconcile(&self, event: &InboundEvent) -> Result<Reconciliation> {
        let claim = match event {
            InboundEvent::Probe { event_name } => return self.probe(event_name),
            InboundEvent::Claim(claim) => claim,
        };

        let transition = self.plan(claim);
        tracing::debug!(
            action = %claim.action,
            subject = %claim.subject,
            state = ?self.claim_state(claim),
            ?transition,
            "planned reconciliation"
        );

        match transition {
            Transition::Release => self.release(claim),
            Transition::Confirm => self.confirm(claim),
            Transition::Acquire => self.acquire(claim),
            Transition::Noop | Transition::Probe => {
                tracing::info!(label = %self.label, "label not present, doing nothing");
                Ok(Reconciliation::new(Transition::Noop, Outcome::default()))
            }
        }
    }

    fn probe(&self, event_name: &str) -> Result<Reconciliation> {
        tracing::info!(event = event_name, "reading lock holder");
        let outcome = match self.provider.read()? {
            Some(holder) => {
                tracing::info!(%holder, "lock is held");
                Outcome::locked_by(holder)
            }
            None => Outcome::released(),
        };
        Ok(Reconciliation::new(Transition::Probe, outcome))
    }

    fn release(&self, claim: &ClaimEvent) -> Result<Reconciliation> {
        tracing::info!(label = %self.label, token = %claim.subject_url, "unlocking");

        match self.provider.unlock(&claim.subject_url) {
            Ok(()) => tracing::info!("unlocked"),
            Err(MutexError::NotHolder { holder: None, .. }) => {
                tracing::info!("lock was already free");
            }
            Err(MutexError::NotHolder {
                holder: Some(holder),
                ..
            }) => {
                tracing::info!(label = %self.label, %holder, "lock currently claimed by another subject");
                return Ok(Reconciliation::new(
                    Transition::Release,
                    Outcome::locked_by(holder),
                ));
            }
            Err(e) => return Err(e),
        }

        let mut reconciliation = Reconciliation::new(Transition::Release, Outcome::released());
        for label in [self.label.clone(), self.confirmed_label()] {
            match self.labels.remove_label(&claim.subject, &label) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(%label, "label already absent");
                }
                Err(e) => {
                    tracing::warn!(%label, error = %e, "failed to remove label");
                    reconciliation.label_failures.push(e);
                }
            }
        }
        Ok(reconciliation)
    }

    fn confirm(&self, claim: &ClaimEvent) -> Result<Reconciliation> {
        let token = &claim.subject_url;
        tracing::info!(label = %self.label, %token, "lock should already be held, confirming");

        let outcome = self.provider.lock(token)?;
        let result = match outcome {
            LockOutcome { obtained: true, .. } => {
                tracing::warn!(%token, "lock was free although the claim was confirmed");
                Outcome::locked_by(token.as_str())
            }
            LockOutcome {
                holder: Some(holder),
                ..
            } => {
                if holder != *token {
                    tracing::warn!(%token, %holder, "confirmed claim conflicts with the lock holder");
                }
                Outcome::locked_by(holder)
            }
            LockOutcome { holder: None, .. } => {
                return Err(MutexError::InvariantViolation(format!(
                    "lock for {} was neither obtained nor held",
                    token
                )));
            }
        };
        Ok(Reconciliation::new(Transition::Confirm, result))
    }

    fn acquire(&self, claim: &ClaimEvent) -> Result<Reconciliation> {
        let token = &claim.subject_url;
        tracing::info!(label = %self.label, %token, "lock requested, trying to lock");

        let outcome = self.provider.lock(token)?;
        // The event lacks the confirmed label, so a re-confirmed holder gets it back too.
        if outcome.is_held_by(token) {
            tracing::info!(label = %self.label, obtained = outcome.obtained, "lock held");
            let mut reconciliation =
                Reconciliation::new(Transition::Acquire, Outcome::locked_by(token.as_str()));
            if let Err(e) = self
                .labels
                .add_labels(&claim.subject, &[self.confirmed_label()])
            {
                tracing::warn!(error = %e, "failed to add confirmed label");
                reconciliation.label_failures.push(e);
            }
            return Ok(reconciliation);
        }

        match outcome.holder {
            Some(holder) => {
                tracing::info!(label = %self.label, %holder, "lock claimed by another subject");
                Ok(Reconciliation::new(
                    Transition::Acquire,
                    Outcome::locked_by(holder),
                ))
            }
            None => Err(MutexError::InvariantViolation(format!(
                "lock for {} was neither obtained nor held",
                token
            ))),
        }
    }
}
