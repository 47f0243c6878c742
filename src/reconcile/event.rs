//! Inbound events.
//!
//! Pull request payloads carry a claim intent. Push, schedule and manual
//! dispatch events are probes: they only ask who holds the lock.

use super::labels::Subject;
use crate::error::{MutexError, Result};
use serde::Deserialize;
use std::collections::BTreeSet;

/// Event names handled as claim intents.
pub const CLAIM_EVENTS: &[&str] = &["pull_request", "pull_request_target"];

/// Event names handled as probes.
pub const PROBE_EVENTS: &[&str] = &["push", "schedule", "workflow_dispatch"];

/// An event to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Claim(ClaimEvent),
    Probe { event_name: String },
}

/// Claim intent derived from a pull request event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvent {
    /// `labeled`, `unlabeled`, `closed`, `synchronize`, ...
    pub action: String,
    pub subject_open: bool,
    /// The pull request URL, used as the holder token.
    pub subject_url: String,
    /// Labels on the subject after the action.
    pub labels: BTreeSet<String>,
    /// The label an `unlabeled` action removed.
    pub removed_label: Option<String>,
    pub subject: Subject,
}

impl ClaimEvent {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    #[serde(default)]
    label: Option<LabelPayload>,
    pull_request: PullRequestBody,
    #[serde(default)]
    repository: Option<RepositoryPayload>,
}

#[derive(Debug, Deserialize)]
struct PullRequestBody {
    number: u64,
    #[serde(default)]
    html_url: String,
    state: String,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    #[serde(default)]
    base: Option<BaseRef>,
}

#[derive(Debug, Deserialize)]
struct LabelPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BaseRef {
    repo: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: OwnerPayload,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    login: String,
}

/// Parse the payload of the event named `event_name`.
pub fn parse_event(event_name: &str, payload: &[u8]) -> Result<InboundEvent> {
    if CLAIM_EVENTS.contains(&event_name) {
        return parse_pull_request(payload).map(InboundEvent::Claim);
    }

    if PROBE_EVENTS.contains(&event_name) {
        // The payload is unused, but a corrupt one still aborts the pass.
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| MutexError::EventError(format!("{} payload: {}", event_name, e)))?;
        if !value.is_object() {
            return Err(MutexError::EventError(format!(
                "{} payload is not a JSON object",
                event_name
            )));
        }
        return Ok(InboundEvent::Probe {
            event_name: event_name.to_string(),
        });
    }

    Err(MutexError::UserError(format!(
        "unknown event '{}' (expected one of: {}, {})",
        event_name,
        CLAIM_EVENTS.join(", "),
        PROBE_EVENTS.join(", ")
    )))
}

fn parse_pull_request(payload: &[u8]) -> Result<ClaimEvent> {
    let event: PullRequestPayload = serde_json::from_slice(payload)
        .map_err(|e| MutexError::EventError(format!("pull_request payload: {}", e)))?;
    let pr = event.pull_request;

    if pr.html_url.trim().is_empty() {
        return Err(MutexError::EventError(
            "pull_request.html_url is missing".to_string(),
        ));
    }

    // The base repository owns the issue; fall back to the event's repository.
    let repo = pr
        .base
        .map(|base| base.repo)
        .or(event.repository)
        .ok_or_else(|| {
            MutexError::EventError("payload names no repository".to_string())
        })?;

    let removed_label = match event.action.as_str() {
        "unlabeled" => event.label.map(|l| l.name),
        _ => None,
    };

    Ok(ClaimEvent {
        subject_open: pr.state == "open",
        subject_url: pr.html_url,
        labels: pr.labels.into_iter().map(|l| l.name).collect(),
        removed_label,
        subject: Subject {
            owner: repo.owner.login,
            repo: repo.name,
            number: pr.number,
        },
        action: event.action,
    })
}
