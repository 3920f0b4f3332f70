//! Core domain for the repository analysis sync.
//!
//! This crate contains every domain concept shared by the workspace: newtype
//! identifiers, the local checkout model, the payloads of the remote analysis
//! service, the orchestrator's state enum, and the port traits infrastructure
//! crates implement.
//!
//! ## Architectural Layer
//!
//! **Business types + port definitions.** This crate performs no I/O. It
//! defines *what* the orchestrator needs; infrastructure crates define *how*
//! to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`BranchName`, `CommitSha`, `SessionId`, etc.) |
//! | [`types`] | Provider, repository identity, HEAD, remotes, pagination |
//! | [`analysis`] | Remote service payloads (analysis snapshot, pull requests, issues) |
//! | [`state`] | `OrchestratorState`, `BranchClassification`, transition graph |
//! | [`errors`] | `ServiceError`, `VcsError`, `RetryPolicy` |
//! | [`ports`] | Traits for the VCS, remote service, auth store, notifier, CLI wrapper |
//! | [`remote_url`] | Remote URL to repository identity resolution |

pub mod analysis;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod remote_url;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use analysis::{
    AnalysedCommit, AnalysisBlocker, AnalysisResult, AnalysisSnapshot, CoverageSummary,
    FirstAnalysisStatus, IssueRecord, IssueSeverity, JoinStatus, Membership, Organization,
    PullRequestAnalysis, PullRequestSnapshot, PullRequestSummary, RepositoryAnalysis,
};
pub use errors::{RetryPolicy, ServiceError, VcsError};
pub use identifiers::{
    BranchName, CommitSha, IssueId, OrganizationName, PullRequestNumber, RemoteName,
    RepositoryName, SessionId,
};
pub use ports::{
    AuthStore, CliWrapper, CliWrapperFactory, LocalRepository, LocalVcsProvider, Notification,
    Notifier, RemoteAnalysisService,
};
pub use remote_url::resolve_remote_url;
pub use state::{BranchClassification, OrchestratorState, StateChange};
pub use types::{Head, Page, Provider, Remote, RepositoryIdentity, Timestamp};
