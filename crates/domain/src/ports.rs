//! Port traits implemented by infrastructure crates.
//!
//! The orchestrator depends only on these traits. Every trait is object safe
//! and `Send + Sync` so implementations can be shared behind `Arc<dyn _>`
//! across tasks.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    BranchName, CoverageSummary, FirstAnalysisStatus, Head, IssueRecord, JoinStatus, Organization,
    OrganizationName, Page, Provider, PullRequestNumber, PullRequestSnapshot, PullRequestSummary,
    Remote, RepositoryAnalysis, RepositoryIdentity, ServiceError, VcsError,
};

// ---------------------------------------------------------------------------
// Local version control
// ---------------------------------------------------------------------------

/// One local checkout as exposed by the VCS integration.
#[async_trait]
pub trait LocalRepository: Send + Sync {
    /// Root directory of the working tree. Two handles with the same root
    /// refer to the same repository.
    fn root(&self) -> &Path;

    /// Current HEAD, or `None` while it cannot be read (e.g. during a clone).
    fn head(&self) -> Option<Head>;

    /// Configured remotes in the order the VCS reports them.
    fn remotes(&self) -> Vec<Remote>;

    /// Emits an item whenever HEAD, the branch, or the remotes may have
    /// changed. Dropping the stream unsubscribes.
    fn changes(&self) -> BoxStream<'static, ()>;

    /// Switches the working tree to `branch`, creating a local branch from a
    /// remote-tracking one when needed.
    async fn checkout(&self, branch: &BranchName) -> Result<(), VcsError>;
}

/// Enumerates the local repositories the host has open.
pub trait LocalVcsProvider: Send + Sync {
    fn repositories(&self) -> Vec<Arc<dyn LocalRepository>>;
}

// ---------------------------------------------------------------------------
// Remote analysis service
// ---------------------------------------------------------------------------

/// The remote code-quality analysis service.
///
/// Every call either returns a typed payload or a [`ServiceError`].
#[async_trait]
pub trait RemoteAnalysisService: Send + Sync {
    async fn get_organization(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<Organization, ServiceError>;

    /// Looks up a repository and its latest analysis, optionally scoped to
    /// one branch.
    async fn get_repository_with_analysis(
        &self,
        identity: &RepositoryIdentity,
        branch: Option<&BranchName>,
    ) -> Result<RepositoryAnalysis, ServiceError>;

    async fn list_enabled_branches(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Vec<BranchName>, ServiceError>;

    /// Coverage-report summary; `None` when coverage was never set up.
    async fn get_coverage_summary(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Option<CoverageSummary>, ServiceError>;

    /// Lists open pull requests, one page per call.
    async fn list_pull_requests(
        &self,
        identity: &RepositoryIdentity,
        cursor: Option<&str>,
    ) -> Result<Page<PullRequestSummary>, ServiceError>;

    async fn get_pull_request(
        &self,
        identity: &RepositoryIdentity,
        number: PullRequestNumber,
    ) -> Result<PullRequestSnapshot, ServiceError>;

    /// Searches the issues found on `branch`, one page per call. `limit` caps
    /// the page size.
    async fn search_issues(
        &self,
        identity: &RepositoryIdentity,
        branch: &BranchName,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<IssueRecord>, ServiceError>;

    async fn get_first_analysis_status(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<FirstAnalysisStatus, ServiceError>;

    async fn get_join_status(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<JoinStatus, ServiceError>;

    /// Adds the repository to the service, queueing its first analysis.
    async fn add_repository(&self, identity: &RepositoryIdentity) -> Result<(), ServiceError>;

    /// Requests membership of an organization.
    async fn join_organization(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<(), ServiceError>;
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Read access to the stored service credentials.
pub trait AuthStore: Send + Sync {
    fn has_token(&self) -> bool;

    /// Emits an item whenever the token is stored, replaced, or removed.
    fn changes(&self) -> BoxStream<'static, ()>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// One-shot user-facing notification for an actionable condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Polling for the first analysis gave up.
    AnalysisTakingLonger { identity: RepositoryIdentity },
    AddRepositoryFailed {
        identity: RepositoryIdentity,
        reason: String,
    },
    JoinOrganizationFailed {
        provider: Provider,
        organization: OrganizationName,
        reason: String,
    },
    CheckoutFailed { branch: BranchName, reason: String },
}

/// Sink for [`Notification`]s.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

// ---------------------------------------------------------------------------
// External analysis CLI
// ---------------------------------------------------------------------------

/// Handle on the external static-analysis CLI for one repository.
pub trait CliWrapper: Send + Sync {
    fn identity(&self) -> &RepositoryIdentity;

    /// Releases the process and any temporary files. Called once when the
    /// handle is evicted.
    fn shutdown(&self);
}

/// Creates [`CliWrapper`] handles.
pub trait CliWrapperFactory: Send + Sync {
    fn create(&self, identity: &RepositoryIdentity, root: &Path) -> Arc<dyn CliWrapper>;
}
