//! Error types for label-mutex.
//!
//! Uses thiserror for derive macros. A lock held by someone else is *not* an
//! error: providers report it through `LockOutcome`. Only releasing a lock the
//! caller does not hold is.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for label-mutex operations.
#[derive(Error, Debug)]
pub enum MutexError {
    /// User provided invalid arguments.
    #[error("{0}")]
    UserError(String),

    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// The inbound event payload could not be understood.
    #[error("malformed event payload: {0}")]
    EventError(String),

    /// The lock store returned a non-retryable failure.
    #[error("lock store error: {0}")]
    BackendError(String),

    /// The governing deadline elapsed before the store call succeeded.
    #[error("deadline exceeded after {attempts} attempt(s): {last_failure}")]
    DeadlineExceeded { attempts: u32, last_failure: String },

    /// Unlock was attempted with a token that does not hold the lock.
    #[error(
        "couldn't unlock with provided value of {token}, lock currently held by {}",
        .holder.as_deref().unwrap_or("nobody")
    )]
    NotHolder {
        token: String,
        holder: Option<String>,
    },

    /// The confirm write lost a race against a concurrent holder change.
    #[error("error confirming lock for {token}: the stored value changed underneath")]
    ConfirmFailed { token: String },

    /// A single label API call failed.
    #[error("label API error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    LabelApi { status: Option<u16>, message: String },

    /// Several independent label mutations failed in one pass.
    #[error("{} label operation(s) failed: {}", .0.len(), join_messages(.0))]
    LabelFailures(Vec<MutexError>),

    /// A state the protocol rules out was observed.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl MutexError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            MutexError::UserError(_) | MutexError::ConfigError(_) => exit_codes::USER_ERROR,
            MutexError::EventError(_) => exit_codes::EVENT_FAILURE,
            MutexError::BackendError(_) | MutexError::DeadlineExceeded { .. } => {
                exit_codes::BACKEND_FAILURE
            }
            MutexError::NotHolder { .. }
            | MutexError::ConfirmFailed { .. }
            | MutexError::InvariantViolation(_) => exit_codes::LOCK_FAILURE,
            MutexError::LabelApi { .. } | MutexError::LabelFailures(_) => {
                exit_codes::LABEL_FAILURE
            }
        }
    }

    /// Whether this is a 404-equivalent from the label API.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MutexError::LabelApi { status: Some(404), .. })
    }
}

fn join_messages(errors: &[MutexError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for label-mutex operations.
pub type Result<T> = std::result::Result<T, MutexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_is_a_user_error() {
        let err = MutexError::ConfigError("input 'label' missing".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn deadline_is_distinct_from_other_backend_errors() {
        let deadline = MutexError::DeadlineExceeded {
            attempts: 4,
            last_failure: "create returned 503".to_string(),
        };
        let backend = MutexError::BackendError("boom".to_string());
        assert!(matches!(deadline, MutexError::DeadlineExceeded { .. }));
        assert!(!matches!(backend, MutexError::DeadlineExceeded { .. }));
        assert_eq!(
            deadline.to_string(),
            "deadline exceeded after 4 attempt(s): create returned 503"
        );
    }

    #[test]
    fn not_holder_names_the_current_holder() {
        let err = MutexError::NotHolder {
            token: "https://x/pull/2".to_string(),
            holder: Some("https://x/pull/1".to_string()),
        };
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
        assert!(err.to_string().ends_with("lock currently held by https://x/pull/1"));

        let err = MutexError::NotHolder {
            token: "https://x/pull/2".to_string(),
            holder: None,
        };
        assert!(err.to_string().ends_with("held by nobody"));
    }

    #[test]
    fn label_not_found_is_recognised() {
        let missing = MutexError::LabelApi {
            status: Some(404),
            message: "Label does not exist".to_string(),
        };
        let forbidden = MutexError::LabelApi {
            status: Some(403),
            message: "Forbidden".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!forbidden.is_not_found());
        assert_eq!(forbidden.to_string(), "label API error (403): Forbidden");
    }

    #[test]
    fn label_failures_are_joined() {
        let err = MutexError::LabelFailures(vec![
            MutexError::LabelApi {
                status: Some(500),
                message: "a".to_string(),
            },
            MutexError::LabelApi {
                status: None,
                message: "b".to_string(),
            },
        ]);
        assert_eq!(err.exit_code(), exit_codes::LABEL_FAILURE);
        assert_eq!(
            err.to_string(),
            "2 label operation(s) failed: label API error (500): a; label API error: b"
        );
    }
}
