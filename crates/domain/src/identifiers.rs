//! Newtype domain identifiers.
//!
//! Branch names, commit SHAs, and provider-side names are all strings on the
//! wire. Wrapping each one in its own type keeps an [`OrganizationName`] from
//! being passed where a [`RepositoryName`] is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), AsRef<str>, Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: provider-assigned integers
// ---------------------------------------------------------------------------

/// Number of a pull request as assigned by the hosting provider.
///
/// Only unique within one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PullRequestNumber(u64);

impl PullRequestNumber {
    /// Creates a pull request number from the raw provider value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PullRequestNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one tracking session: the span between opening a local
/// repository and closing it (or switching to another one).
///
/// Every timer and listener installed for a repository is tagged with the
/// session it belongs to; completions carrying a stale id are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (VCS and provider names)
// ---------------------------------------------------------------------------

string_id! {
    /// A branch name without the `refs/heads/` prefix (e.g. `"main"`,
    /// `"feature/login"`).
    BranchName
}

string_id! {
    /// A commit SHA as reported by the VCS (40-character lowercase hex for Git).
    CommitSha
}

string_id! {
    /// The name of a configured VCS remote (e.g. `"origin"`).
    RemoteName
}

string_id! {
    /// An organization (GitHub organization, GitLab group, Bitbucket workspace)
    /// as named by the hosting provider.
    OrganizationName
}

string_id! {
    /// A repository name as known to the hosting provider, without the
    /// organization prefix.
    RepositoryName
}

string_id! {
    /// Identifies one issue reported by the analysis service.
    IssueId
}
