//! Error and retry-policy types shared across the workspace.
//!
//! [`ServiceError`] is what every [`crate::RemoteAnalysisService`] call returns
//! on failure; [`VcsError`] is what [`crate::LocalRepository`] operations
//! return. The orchestrator never surfaces either to its callers: it maps them
//! to states, log events, or one-shot notifications.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BranchName;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means the caller
        /// applies its own schedule.
        after: Option<Duration>,
    },
    /// Retrying cannot succeed without outside action (new credentials,
    /// onboarding the repository).
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Remote analysis service errors
// ---------------------------------------------------------------------------

/// Structured failure of a remote analysis service call.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ServiceError {
    /// The token is missing, expired, or revoked.
    ///
    /// Produced by: any call. Forces the orchestrator into
    /// `NeedsAuthentication` regardless of its current state.
    #[error("Remote service rejected the credentials")]
    Unauthorized,

    /// The requested organization, repository, pull request, or branch does
    /// not exist (or is invisible to the user).
    #[error("Remote resource not found: {resource}")]
    NotFound { resource: String },

    /// Timeouts, rate limiting, and 5xx responses.
    #[error("Transient remote service failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// A response that could not be interpreted.
    #[error("Unexpected remote service response: {message}")]
    Unexpected { message: String },
}

impl ServiceError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Unexpected { .. } => RetryPolicy::Retryable { after: None },
            Self::Unauthorized | Self::NotFound { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Local VCS errors
// ---------------------------------------------------------------------------

/// Failure of a local version-control operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VcsError {
    /// The working tree could not be switched to `branch` (uncommitted
    /// changes in the way, branch missing locally and on every remote).
    #[error("Checkout of '{branch}' failed: {message}")]
    CheckoutFailed { branch: BranchName, message: String },

    /// The repository could not be opened or read.
    #[error("Local repository unavailable: {message}")]
    Unavailable { message: String },
}
