//! Label mutations on the claiming subject.

use crate::error::{MutexError, Result};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

const USER_AGENT: &str = concat!("label-mutex/", env!("CARGO_PKG_VERSION"));

/// The issue or pull request whose labels are mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Label operations the reconciler performs.
///
/// Removing a label the subject does not carry fails with a 404
/// ([`MutexError::is_not_found`]); callers decide whether that matters.
pub trait LabelApi {
    fn add_labels(&self, subject: &Subject, labels: &[String]) -> Result<()>;
    fn remove_label(&self, subject: &Subject, label: &str) -> Result<()>;
}

impl<L: LabelApi + ?Sized> LabelApi for &L {
    fn add_labels(&self, subject: &Subject, labels: &[String]) -> Result<()> {
        (**self).add_labels(subject, labels)
    }

    fn remove_label(&self, subject: &Subject, label: &str) -> Result<()> {
        (**self).remove_label(subject, label)
    }
}

#[derive(Debug, Serialize)]
struct AddLabelsRequest<'a> {
    labels: &'a [String],
}

/// GitHub REST issue labels.
#[derive(Debug, Clone)]
pub struct GitHubLabels {
    client: Client,
    api_url: String,
    token: String,
}

impl GitHubLabels {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let api_url = api_url.into();
        if api_url.trim().is_empty() {
            return Err(MutexError::ConfigError(
                "github_api_url must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MutexError::LabelApi {
                status: None,
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_url,
            token: token.into(),
        })
    }

    /// `{api}/repos/{owner}/{repo}/issues/{number}/labels[/{label}]`
    fn labels_url(&self, subject: &Subject, label: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(self.api_url.trim_end_matches('/')).map_err(|e| {
            MutexError::ConfigError(format!("invalid github_api_url '{}': {}", self.api_url, e))
        })?;
        let number = subject.number.to_string();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                MutexError::ConfigError("github_api_url cannot be a base".to_string())
            })?;
            segments.pop_if_empty().extend([
                "repos",
                subject.owner.as_str(),
                subject.repo.as_str(),
                "issues",
                number.as_str(),
                "labels",
            ]);
            if let Some(label) = label {
                segments.push(label);
            }
        }
        Ok(url)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .bearer_auth(&self.token)
    }

    fn check(operation: &str, response: reqwest::Result<Response>) -> Result<()> {
        let response = response.map_err(|e| MutexError::LabelApi {
            status: None,
            message: format!("{}: {}", operation, e),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .unwrap_or_else(|_| "unable to read response body".to_string());
        Err(MutexError::LabelApi {
            status: Some(status.as_u16()),
            message: if status == StatusCode::NOT_FOUND {
                format!("{}: not found", operation)
            } else {
                format!("{}: {}", operation, body.trim())
            },
        })
    }
}

impl LabelApi for GitHubLabels {
    fn add_labels(&self, subject: &Subject, labels: &[String]) -> Result<()> {
        let url = self.labels_url(subject, None)?;
        tracing::info!(%subject, ?labels, "adding labels");
        let response = self
            .prepare(self.client.post(url))
            .json(&AddLabelsRequest { labels })
            .send();
        Self::check(&format!("add labels to {}", subject), response)
    }

    fn remove_label(&self, subject: &Subject, label: &str) -> Result<()> {
        let url = self.labels_url(subject, Some(label))?;
        tracing::info!(%subject, label, "removing label");
        let response = self.prepare(self.client.delete(url)).send();
        Self::check(&format!("remove label '{}' from {}", label, subject), response)
    }
}
