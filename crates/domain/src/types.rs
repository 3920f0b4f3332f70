//! Shared value types describing the local checkout and the remote project it
//! maps onto.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BranchName, CommitSha, OrganizationName, RemoteName, RepositoryName};

// ---------------------------------------------------------------------------
// Hosting providers and remote identity
// ---------------------------------------------------------------------------

/// Git hosting provider supported by the analysis service.
///
/// Serialised using the short provider codes the service uses in its URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    /// github.com and GitHub Enterprise hosts.
    #[serde(rename = "gh")]
    GitHub,
    /// gitlab.com and self-managed GitLab hosts.
    #[serde(rename = "gl")]
    GitLab,
    /// bitbucket.org.
    #[serde(rename = "bb")]
    Bitbucket,
}

impl Provider {
    /// Short provider code (`gh`, `gl`, `bb`).
    pub fn code(self) -> &'static str {
        match self {
            Self::GitHub => "gh",
            Self::GitLab => "gl",
            Self::Bitbucket => "bb",
        }
    }

    /// Infers the provider from a host name.
    ///
    /// Matching is by substring so enterprise hosts such as
    /// `github.example.com` or `ssh.github.com` are recognised.
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.to_ascii_lowercase();
        if host.contains("github") {
            Some(Self::GitHub)
        } else if host.contains("gitlab") {
            Some(Self::GitLab)
        } else if host.contains("bitbucket") {
            Some(Self::Bitbucket)
        } else {
            None
        }
    }

    /// Parses a short provider code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "gh" => Some(Self::GitHub),
            "gl" => Some(Self::GitLab),
            "bb" => Some(Self::Bitbucket),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The remote project a local checkout maps onto.
///
/// Derived from a remote URL; immutable for a given local repository until its
/// set of remotes changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    pub provider: Provider,
    pub organization: OrganizationName,
    pub repository: RepositoryName,
}

impl RepositoryIdentity {
    pub fn new(
        provider: Provider,
        organization: OrganizationName,
        repository: RepositoryName,
    ) -> Self {
        Self {
            provider,
            organization,
            repository,
        }
    }
}

impl std::fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.provider, self.organization, self.repository
        )
    }
}

// ---------------------------------------------------------------------------
// Local checkout state
// ---------------------------------------------------------------------------

/// The checked-out position of a local repository.
///
/// A repository whose HEAD cannot be read at all (e.g. it is still being
/// cloned) reports `None` instead of a `Head`; a detached HEAD has a commit
/// but no branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    /// Checked-out branch; `None` when HEAD is detached.
    pub branch: Option<BranchName>,

    /// Commit HEAD points at.
    pub commit: Option<CommitSha>,

    /// Commits on the local branch not yet on its upstream.
    ///
    /// `None` when the branch has no upstream.
    pub ahead: Option<u32>,

    /// Commits on the upstream not yet on the local branch.
    pub behind: Option<u32>,
}

impl Head {
    /// Returns `true` when every local commit has been pushed.
    pub fn is_pushed(&self) -> bool {
        self.ahead == Some(0)
    }
}

/// A configured VCS remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: RemoteName,
    pub fetch_url: Option<String>,
    pub push_url: Option<String>,
}

impl Remote {
    /// The URL used to resolve the remote project: the push URL when one is
    /// configured, otherwise the fetch URL.
    pub fn url(&self) -> Option<&str> {
        self.push_url.as_deref().or(self.fetch_url.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Cursor for the next page; `None` on the last page.
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// A UTC timestamp. Wraps [`chrono::DateTime<Utc>`] for consistent
/// serialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
