//! Error types for the git adapter.

use std::path::PathBuf;

use domain::{BranchName, VcsError};

/// Failure while reading or changing a local git repository.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("repository at {path} has no working tree")]
    Bare { path: PathBuf },

    /// Neither a local branch nor a remote-tracking branch has this name.
    #[error("no local or remote-tracking branch named {branch}")]
    BranchNotFound { branch: BranchName },

    #[error("blocking git task failed: {0}")]
    Runtime(String),
}

impl GitError {
    /// Maps the error onto the port-level error for a checkout of `branch`.
    pub fn into_checkout_error(self, branch: &BranchName) -> VcsError {
        match self {
            GitError::Runtime(message) => VcsError::Unavailable { message },
            other => VcsError::CheckoutFailed {
                branch: branch.clone(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_error_mapping() {
        let branch = BranchName::new("feature").unwrap();

        let missing = GitError::BranchNotFound {
            branch: branch.clone(),
        };
        assert!(matches!(
            missing.into_checkout_error(&branch),
            VcsError::CheckoutFailed { message, .. } if message.contains("feature")
        ));

        let runtime = GitError::Runtime("cancelled".into());
        assert!(matches!(
            runtime.into_checkout_error(&branch),
            VcsError::Unavailable { .. }
        ));
    }
}
